use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::arch::{BackendKind, BackendSelector};
use crate::config::HarnessConfig;
use crate::error::{ErrorKind, TestError};
use crate::harness::TestContext;
use crate::types::{RunOptions, TestStatus};
use crate::verify;

pub type TestProcedure = Rc<dyn Fn(&TestContext<'_>, &str) -> Result<(), TestError>>;

#[derive(Clone)]
pub struct TestCase {
    pub name: String,
    pub group: String,
    procedure: TestProcedure,
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("group", &self.group)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TestReport {
    pub name: String,
    pub status: TestStatus,
    pub error_kind: Option<ErrorKind>,
    pub detail: Option<String>,
    pub output: Option<String>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Named(Vec<String>),
}

impl Selection {
    /// An empty list selects every test.
    pub fn from_names(names: Vec<String>) -> Self {
        if names.is_empty() {
            Selection::All
        } else {
            Selection::Named(names)
        }
    }
}

/// Name to procedure table, filled once at startup.
#[derive(Default)]
pub struct TestRegistry {
    cases: Vec<TestCase>,
    group: String,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixture subdirectory used by tests registered from now on.
    pub fn set_group(&mut self, group: impl Into<String>) {
        self.group = group.into();
    }

    /// Registers one implementation under each of `names`.
    pub fn register<F>(&mut self, procedure: F, names: &[&str]) -> Result<(), TestError>
    where
        F: Fn(&TestContext<'_>, &str) -> Result<(), TestError> + 'static,
    {
        let procedure: TestProcedure = Rc::new(procedure);
        for name in names {
            self.insert(name, Rc::clone(&procedure))?;
        }
        Ok(())
    }

    /// Registers `<name>_emulator` and `<name>_verilator`, both built from
    /// `<name>.c` (or `.cpp`, `.S`, `.s`).
    pub fn register_generic(&mut self, name: &str) -> Result<(), TestError> {
        self.register_generic_on(name, &BackendKind::ALL)
    }

    pub fn register_generic_on(
        &mut self,
        name: &str,
        backends: &[BackendKind],
    ) -> Result<(), TestError> {
        let procedure: TestProcedure = Rc::new(run_generic_test);
        for kind in backends {
            let variant = format!("{name}{}", kind.suffix());
            self.insert(&variant, Rc::clone(&procedure))?;
        }
        Ok(())
    }

    fn insert(&mut self, name: &str, procedure: TestProcedure) -> Result<(), TestError> {
        if self.contains(name) {
            return Err(TestError::Config(format!("test {name} registered twice")));
        }
        self.cases.push(TestCase {
            name: name.to_string(),
            group: self.group.clone(),
            procedure,
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cases.iter().any(|case| case.name == name)
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Resolves `selection`; any unknown name fails before anything runs.
    pub fn select(&self, selection: &Selection) -> Result<Vec<&TestCase>, TestError> {
        match selection {
            Selection::All => Ok(self.cases.iter().collect()),
            Selection::Named(names) => {
                let unknown = names
                    .iter()
                    .filter(|name| !self.contains(name))
                    .cloned()
                    .collect::<Vec<_>>();
                if !unknown.is_empty() {
                    return Err(TestError::Config(format!(
                        "unknown test(s): {}",
                        unknown.join(", ")
                    )));
                }
                Ok(names
                    .iter()
                    .filter_map(|name| self.cases.iter().find(|case| &case.name == name))
                    .collect())
            }
        }
    }
}

fn run_generic_test(ctx: &TestContext<'_>, name: &str) -> Result<(), TestError> {
    let kind = BackendKind::from_test_name(name);
    let base = name.strip_suffix(&kind.suffix()).unwrap_or(name);
    let source = ctx.find_source(base)?;
    let image = ctx.build_source(&source)?;
    let result = ctx.run_backend(kind, &image, &RunOptions::default())?;
    verify::expect_no_failure(&result.output)?;
    verify::check_optional_directives(&source, &result.output)
        .map_err(|err| err.with_output(&result.output))
}

/// Runs registered tests one at a time against a configuration.
pub struct Suite<'a> {
    pub registry: &'a TestRegistry,
    pub config: &'a HarnessConfig,
    pub backends: &'a BackendSelector,
}

impl<'a> Suite<'a> {
    pub fn run(&self, selection: &Selection) -> Result<SuiteReport, TestError> {
        let cases = self.registry.select(selection)?;
        let mut reports = Vec::with_capacity(cases.len());
        for case in cases {
            let report = self.run_case(case);
            println!("{} {}", report.name, report.status.label());
            reports.push(report);
        }
        Ok(SuiteReport { reports })
    }

    fn run_case(&self, case: &TestCase) -> TestReport {
        log::info!("running {}", case.name);
        let started = Instant::now();
        let outcome = TestContext::new(&case.name, &case.group, self.config, self.backends)
            .and_then(|ctx| {
                panic::catch_unwind(AssertUnwindSafe(|| (case.procedure)(&ctx, &case.name)))
                    .unwrap_or_else(|payload| {
                        Err(TestError::assertion(format!(
                            "test panicked: {}",
                            panic_message(payload.as_ref())
                        )))
                    })
            });
        let duration = started.elapsed();

        match outcome {
            Ok(()) => TestReport {
                name: case.name.clone(),
                status: TestStatus::Passed,
                error_kind: None,
                detail: None,
                output: None,
                duration,
            },
            Err(err) => {
                log::warn!("{} failed ({}): {err}", case.name, err.kind().label());
                if let Some(output) = err.output() {
                    log::debug!("{} output:\n{output}", case.name);
                }
                TestReport {
                    name: case.name.clone(),
                    status: TestStatus::Failed,
                    error_kind: Some(err.kind()),
                    detail: Some(err.to_string()),
                    output: err.output().map(str::to_string),
                    duration,
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub reports: Vec<TestReport>,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.count(TestStatus::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(TestStatus::Failed)
    }

    fn count(&self, status: TestStatus) -> usize {
        self.reports.iter().filter(|report| report.status == status).count()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    /// 0 iff every selected test passed.
    pub fn exit_code(&self) -> i32 {
        if self.all_passed() { 0 } else { 1 }
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestReport> {
        self.reports
            .iter()
            .filter(|report| report.status == TestStatus::Failed)
    }
}
