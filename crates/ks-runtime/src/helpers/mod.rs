pub(crate) mod rhai_bridge;
