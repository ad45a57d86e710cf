//! Scenario tests over faked external tools and decoders

pub(crate) mod fixtures;
