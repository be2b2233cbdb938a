//! Cache generations: blue/green snapshots of all partitions.
//!
//! A generation is created `installing`, filled partition by partition, then
//! atomically swapped in as `active`. The generation it replaces becomes
//! `superseded` and its buckets are reclaimed by the next garbage collection.

pub mod manager;

pub use manager::{GcReport, Generation, GenerationManager, GenerationStatus};
