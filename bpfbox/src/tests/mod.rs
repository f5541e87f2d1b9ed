
mod test_intercept;
mod test_reporter;
