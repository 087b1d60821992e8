//! Library tests for mlabc-lib, built with the `test-util` feature.

mod common;
mod compile_tests;
mod http_tests;
