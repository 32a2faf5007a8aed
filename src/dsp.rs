//! Modules related to DSP algorithms, ie: Burg linear prediction.

pub mod burg;
