//! Audio ingress buffering.

mod ingress;

pub use ingress::{ingress_channel, AudioError, AudioReader, AudioWriter};
