pub mod rate_limit_counter;
