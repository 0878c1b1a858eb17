//! Sample scenario - a workflow, an activity completer and a signal handler
//!
//! Three routines share one host thread. The main workflow schedules an
//! activity and waits for it, then waits for a signal while a child task
//! yields in the background. A second routine completes the activity; a
//! third delivers the signal. The host pumps each routine explicitly, so the
//! interleaving below is the same on every run:
//!
//! ```text
//! host ── start main ── start completer ── start signal handler ── pump main
//!      ── pump signal handler until done ── pump main until done
//! ```

use std::sync::{Arc, Mutex};

use anyhow::{bail, Context as _};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::Engine;
use crate::placeholder::{self, Placeholder, Resolver};
use crate::routine::Routine;
use crate::scheduler::{ambient, lock, spawn, yield_now, OperationHandle};

/// Upper bound on pumps spent waiting for one routine to finish
const MAX_PUMPS: usize = 32;

/* ===================== Trace ===================== */

/// Ordered, thread-safe log of what ran where
///
/// Lines never carry ids, so two runs of the scenario can be compared.
#[derive(Clone)]
pub struct Trace {
    lines: Arc<Mutex<Vec<String>>>,
    worker_thread_name: Arc<str>,
}

impl Trace {
    pub fn new(worker_thread_name: &str) -> Self {
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            worker_thread_name: worker_thread_name.into(),
        }
    }

    pub fn record(&self, message: impl Into<String>) {
        let message = message.into();
        let thread = if std::thread::current().name() == Some(&*self.worker_thread_name) {
            "worker"
        } else {
            "host"
        };
        let context = if ambient::current().is_some() { "routine" } else { "none" };

        let line = format!("[thread={}; context={}] {}", thread, context, message);
        debug!(target: "routine::scenario", "{}", line);
        lock(&self.lines).push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }
}

/* ===================== Results ===================== */

/// Operations queued on the main workflow after a host step
#[derive(Debug, Clone, Serialize)]
pub struct PendingSnapshot {
    pub step: String,
    pub operations: Vec<OperationHandle>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleRun {
    pub trace: Vec<String>,
    pub snapshots: Vec<PendingSnapshot>,
    pub result: bool,
}

/* ===================== Routines ===================== */

/// State the routines share, standing in for workflow instance fields
struct Workflow {
    trace: Trace,
    activity: Mutex<Option<(String, Resolver<String>)>>,
    signal: Mutex<Option<Resolver<String>>>,
}

impl Workflow {
    fn schedule_activity(&self, name: &str) -> Placeholder<String> {
        self.trace.record(format!("ScheduleActivity(\"{}\"): 1", name));
        let (resolver, placeholder) = placeholder::activity(name);
        *lock(&self.activity) = Some((name.to_string(), resolver));
        self.trace.record(format!("ScheduleActivity(\"{}\"): End", name));
        placeholder
    }
}

async fn workflow_main(workflow: Arc<Workflow>, signal: Placeholder<String>) -> anyhow::Result<bool> {
    let trace = &workflow.trace;
    trace.record("WorkflowMain: 1");

    let activity = workflow.schedule_activity("Activity 1");
    trace.record("WorkflowMain: 2");

    let value = activity.await.context("activity did not complete")?;
    trace.record(format!("WorkflowMain: 3; activity=\"{}\"", value));

    let child_trace = trace.clone();
    let child = spawn(async move {
        child_trace.record("Child: 1");
        yield_now().await;
        child_trace.record("Child: 2");
        yield_now().await;
        child_trace.record("Child: End");
    })?;

    let signal = signal.await.context("signal was never delivered")?;
    trace.record(format!("WorkflowMain: 4; signal=\"{}\"", signal));

    child.await?;
    trace.record("WorkflowMain: 5; child finished");

    yield_now().await;
    trace.record("WorkflowMain: End");
    Ok(true)
}

async fn complete_activity(workflow: Arc<Workflow>) -> anyhow::Result<()> {
    let trace = &workflow.trace;
    let pending = lock(&workflow.activity).take();

    match pending {
        None => trace.record("CompleteActivity: no activity was scheduled"),
        Some((name, resolver)) => {
            trace.record(format!("CompleteActivity: completing activity \"{}\"", name));
            resolver.resolve(name.clone());
            trace.record(format!("CompleteActivity: completed activity \"{}\"", name));
        }
    }

    trace.record("CompleteActivity: End");
    Ok(())
}

async fn signal_handler(workflow: Arc<Workflow>, data: String) -> anyhow::Result<()> {
    let trace = &workflow.trace;
    trace.record(format!("SignalHandler(\"{}\"): 1", data));

    yield_now().await;
    trace.record(format!("SignalHandler(\"{}\"): 2", data));

    let resolver = lock(&workflow.signal).take();
    if let Some(resolver) = resolver {
        resolver.resolve(data.clone());
    }
    trace.record(format!("SignalHandler(\"{}\"): 3", data));

    yield_now().await;
    trace.record(format!("SignalHandler(\"{}\"): End", data));
    Ok(())
}

/* ===================== Host ===================== */

fn pump_until_completed<T>(routine: &Routine<T>, name: &str, trace: &Trace, step: &str) -> anyhow::Result<()> {
    for _ in 0..MAX_PUMPS {
        if routine.is_completed() {
            return Ok(());
        }
        trace.record(format!("Execute: {}.1", step));
        routine
            .pump()
            .with_context(|| format!("pumping {} failed", name))?;
        trace.record(format!("Execute: {}.2", step));
    }

    if routine.is_completed() {
        Ok(())
    } else {
        bail!("{} did not complete within {} pumps", name, MAX_PUMPS)
    }
}

/// Run the sample scenario once on `engine`
pub fn run_sample(engine: &Engine) -> anyhow::Result<SampleRun> {
    let trace = Trace::new(&engine.config().thread_name);
    let (signal_resolver, signal) = placeholder::signal::<String>("Signal A");
    let workflow = Arc::new(Workflow {
        trace: trace.clone(),
        activity: Mutex::new(None),
        signal: Mutex::new(Some(signal_resolver)),
    });

    let mut snapshots = Vec::new();
    let mut snapshot = |step: &str, routine: &Routine<bool>| {
        snapshots.push(PendingSnapshot {
            step: step.to_string(),
            operations: routine.pending_operations(),
        });
    };

    trace.record("Execute: 1");
    let main = engine.start(
        |workflow: Arc<Workflow>, _| workflow_main(workflow, signal),
        Arc::clone(&workflow),
        CancellationToken::new(),
    );
    snapshot("main started", &main);

    trace.record("Execute: 2");
    let completer = engine.start(
        |workflow: Arc<Workflow>, _| complete_activity(workflow),
        Arc::clone(&workflow),
        CancellationToken::new(),
    );
    pump_until_completed(&completer, "activity completer", &trace, "3")?;
    snapshot("activity completed", &main);

    trace.record("Execute: 4");
    let handler = engine.start(
        |(workflow, data): (Arc<Workflow>, String), _| signal_handler(workflow, data),
        (Arc::clone(&workflow), "Signal A received".to_string()),
        CancellationToken::new(),
    );

    main.pump().context("pumping main workflow failed")?;
    snapshot("main resumed", &main);

    trace.record("Execute: 5");
    pump_until_completed(&handler, "signal handler", &trace, "6")?;
    snapshot("signal delivered", &main);

    pump_until_completed(&main, "main workflow", &trace, "7")?;
    snapshot("main finished", &main);

    let result = main
        .try_result()
        .context("main workflow has no result")?
        .context("main workflow failed")?;
    trace.record(format!("Execute: End; result={}", result));

    Ok(SampleRun {
        trace: trace.lines(),
        snapshots,
        result,
    })
}

/// Run the scenario `runs` times and check every run produced the same trace
pub fn run_repeated(engine: &Engine, runs: usize) -> anyhow::Result<Vec<SampleRun>> {
    let mut results: Vec<SampleRun> = Vec::with_capacity(runs);

    for run in 0..runs {
        let sample = run_sample(engine).with_context(|| format!("sample run {} failed", run + 1))?;
        if let Some(first) = results.first() {
            if first.trace != sample.trace {
                bail!("sample run {} produced a different trace than run 1", run + 1);
            }
        }
        results.push(sample);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_engine;

    #[test]
    fn test_sample_completes_with_expected_interleaving() {
        let run = run_sample(test_engine()).unwrap();
        assert!(run.result);

        let position = |needle: &str| {
            run.trace
                .iter()
                .position(|line| line.ends_with(needle))
                .unwrap_or_else(|| panic!("missing trace line {:?}", needle))
        };

        // The prefix of main runs on the host thread before start returns
        assert!(position("WorkflowMain: 2") < position("Execute: 2"));
        assert!(run.trace[1].starts_with("[thread=host; context=routine]"));

        // Completing the activity posts main's continuation but does not run it
        assert!(position("CompleteActivity: End") < position("Execute: 4"));
        assert!(position("Execute: 4") < position("WorkflowMain: 3; activity=\"Activity 1\""));

        // The child drains with main, before the signal handler resumes
        assert!(position("Child: End") < position("Execute: 5"));
        assert!(position("SignalHandler(\"Signal A received\"): End") < position("WorkflowMain: 4; signal=\"Signal A received\""));
        assert!(position("WorkflowMain: End") < position("Execute: End; result=true"));

        let resumed = &run.trace[position("WorkflowMain: 3; activity=\"Activity 1\"")];
        assert!(resumed.starts_with("[thread=worker; context=routine]"));
    }

    #[test]
    fn test_snapshots_track_main_queue() {
        let run = run_sample(test_engine()).unwrap();
        let steps: Vec<_> = run.snapshots.iter().map(|s| s.step.as_str()).collect();
        assert_eq!(
            steps,
            vec!["main started", "activity completed", "main resumed", "signal delivered", "main finished"]
        );

        assert!(run.snapshots[0].operations.is_empty());
        assert_eq!(run.snapshots[1].operations.len(), 1);
        assert!(run.snapshots[2].operations.is_empty());
        assert_eq!(run.snapshots[3].operations.len(), 1);
        assert!(run.snapshots[4].operations.is_empty());
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let runs = run_repeated(test_engine(), 3).unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].trace, runs[2].trace);
    }
}
