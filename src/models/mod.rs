pub mod args;
pub mod check_option;
pub mod http_error_stats;
pub mod outcome;
pub mod request_option;
pub mod result;
pub mod run_config;
pub mod serde_duration;
pub mod stage;
pub mod threshold_rule;
pub mod virtual_user;
