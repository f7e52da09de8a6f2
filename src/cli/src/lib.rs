//! layerdb CLI - pull container images into content-addressed stores.

pub mod commands;
pub mod output;
