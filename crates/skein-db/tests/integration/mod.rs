mod common;
mod filter_tests;
mod record_tests;
