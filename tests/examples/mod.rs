mod custom_request_matcher_tests;
mod getting_started_tests;
mod session_tests;
