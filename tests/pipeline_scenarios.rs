//! End-to-end pipeline scenarios run through the public API

mod helpers;
mod scenarios;
