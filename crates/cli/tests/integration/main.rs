mod common;

mod deploy_tests;
mod purge_tests;
mod run_tests;
mod teardown_tests;
