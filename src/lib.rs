//! cloudauto: Compute Engine helpers for disks, images, instances and
//! metadata, plus a small demo JSON service.

pub mod config;
pub mod gcp;
pub mod service;
