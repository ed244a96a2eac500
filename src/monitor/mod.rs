//! Usage monitoring: per-category accounting over engine inventory and the
//! filesystem reading for the monitored path.

pub mod usage;

#[cfg(test)]
mod test_properties;
