pub mod doctor;
pub mod run_cmd;
pub mod serve;
pub mod tools_cmd;
