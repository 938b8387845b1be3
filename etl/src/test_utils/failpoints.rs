use fail::FailScenario;

/// Enables a set of fail points and turns them off again when dropped.
pub struct TestFailScenario<'a> {
    _scenario: FailScenario<'a>,
    failpoints: Vec<String>,
}

impl<'a> TestFailScenario<'a> {
    /// Configures each `(name, action)` pair, e.g. `("load_table.before_upsert", "return")`.
    pub fn setup(failpoints: &[(&str, &str)]) -> TestFailScenario<'a> {
        let scenario = FailScenario::setup();

        for (failpoint, action) in failpoints {
            fail::cfg(*failpoint, action).unwrap();
        }

        Self {
            _scenario: scenario,
            failpoints: failpoints.iter().map(|(name, _)| name.to_string()).collect(),
        }
    }
}

impl Drop for TestFailScenario<'_> {
    fn drop(&mut self) {
        for failpoint in &self.failpoints {
            fail::remove(failpoint);
        }
    }
}
