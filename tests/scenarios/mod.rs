//! Scenario Tests

mod fan_out_fan_in;
mod manual_errors;
