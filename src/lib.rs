// ABOUTME: Library crate for rinspect exposing the session pool, SSH transport and inspector

#![allow(missing_docs)]

pub mod config;
pub mod inspect;
pub mod pool;
pub mod ssh;
