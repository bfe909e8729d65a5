pub mod check_request_names;
pub mod checkpoint;
pub mod client;
pub mod metrics_aggregator;
pub mod progress;
pub mod ramp_scheduler;
pub mod run_controller;
pub mod show_result_with_table;
pub mod threshold_evaluator;
pub mod virtual_user;
