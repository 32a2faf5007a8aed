//! boxed error type shared by all the setup paths.
//!
//! Everything that can fail at build time returns one of these so errors can
//! cross thread boundaries without fuss.  The real time callbacks never
//! return errors at all, so this type only ever shows up during setup.
pub type BoxError = std::boxed::Box<
    dyn std::error::Error // must implement Error to satisfy ?
        + std::marker::Send // needed for threads
        + std::marker::Sync, // needed for threads
>;
