use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc,
    },
    time::Duration,
};

use loft_engine::{
    AssignError, CompletionCallback, InvokeError, ManagedObjectSource, OfficeBuilder, OfficeFloorBuilder, PassiveTeam, PooledTeam,
    ProcessOutcome, SourceContext, Sourcing, TaskBuilder, TeamStatus, WorkBuilder,
};
use serde_json::{Value, json};

fn completion() -> (CompletionCallback, mpsc::Receiver<ProcessOutcome>) {
    let (sender, receiver) = mpsc::channel();
    (
        Box::new(move |outcome| {
            let _ = sender.send(outcome);
        }),
        receiver,
    )
}

fn wait_outcome(receiver: &mpsc::Receiver<ProcessOutcome>) -> ProcessOutcome {
    receiver.recv_timeout(Duration::from_secs(5)).expect("process completes in time")
}

#[test]
fn saturated_team_refuses_assignment_immediately() {
    let started = Arc::new(AtomicBool::new(false));
    let released = Arc::new(AtomicBool::new(false));
    let completed = Arc::new(AtomicUsize::new(0));

    let hold_started = started.clone();
    let hold_released = released.clone();
    let hold_completed = completed.clone();

    let office = OfficeBuilder::new("shop").add_work(
        WorkBuilder::new("orders").add_task(TaskBuilder::new("place", "tiny", move |_context: &mut loft_engine::TaskContext| {
            hold_started.store(true, Ordering::SeqCst);
            while !hold_released.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            hold_completed.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        })),
    );

    let mut floor = OfficeFloorBuilder::new()
        .add_team("tiny", PooledTeam::new("tiny", 1, 1))
        .add_office(office)
        .build()
        .expect("floor builds");
    floor.open().expect("floor opens");

    let office = floor.office("shop").expect("office registered");
    let manager = office.function_manager("orders.place").expect("function exists");

    // First invocation occupies the single worker.
    let (first_callback, first_receiver) = completion();
    manager.invoke_process(Value::Null, Some(first_callback)).expect("first accepted");
    while !started.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(1));
    }

    // Second fills the one queue slot.
    let (second_callback, second_receiver) = completion();
    manager.invoke_process(Value::Null, Some(second_callback)).expect("second queues");

    // Third must be refused now, not queued and not hung.
    let refusal = manager.invoke_process(Value::Null, None).expect_err("third is refused");
    match refusal {
        InvokeError::Assignment(AssignError::Overloaded { team }) => assert_eq!(team, "tiny"),
        other => panic!("expected an overload refusal, got {other}"),
    }

    released.store(true, Ordering::SeqCst);
    assert!(wait_outcome(&first_receiver).is_completed());
    assert!(wait_outcome(&second_receiver).is_completed());
    assert_eq!(completed.load(Ordering::SeqCst), 2, "accepted work must still complete");
    floor.close();
}

#[test]
fn lifecycle_brackets_invocation() {
    let office = OfficeBuilder::new("shop").add_work(
        WorkBuilder::new("orders").add_task(TaskBuilder::new("place", "main", |_context: &mut loft_engine::TaskContext| Ok(Value::Null))),
    );

    let mut floor = OfficeFloorBuilder::new()
        .add_team("main", PassiveTeam::new("main"))
        .add_office(office)
        .build()
        .expect("floor builds");

    // Closed floor: nothing is invocable, the team is stopped.
    assert_eq!(floor.teams().status("main"), Some(TeamStatus::Stopped));
    let office_handle = floor.office("shop").expect("office registered");
    let manager = office_handle.function_manager("orders.place").expect("function exists");
    assert!(matches!(manager.invoke_process(Value::Null, None), Err(InvokeError::NotOpen)));

    floor.open().expect("floor opens");
    assert_eq!(floor.teams().status("main"), Some(TeamStatus::Working));
    assert!(floor.teams().started_at("main").is_some());
    manager.invoke_process(Value::Null, None).expect("open floor accepts work");

    floor.close();
    assert_eq!(floor.teams().status("main"), Some(TeamStatus::Stopped));
    assert!(matches!(manager.invoke_process(Value::Null, None), Err(InvokeError::NotOpen)));
}

#[test]
fn startup_flows_run_when_the_floor_opens() {
    let booted = Arc::new(AtomicUsize::new(0));
    let booted_count = booted.clone();

    let office = OfficeBuilder::new("shop")
        .add_work(
            WorkBuilder::new("boot").add_task(TaskBuilder::new("init", "main", move |context: &mut loft_engine::TaskContext| {
                assert_eq!(context.parameter()["mode"], "warm");
                booted_count.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            })),
        )
        .startup("boot.init", json!({ "mode": "warm" }));

    let mut floor = OfficeFloorBuilder::new()
        .add_team("main", PassiveTeam::new("main"))
        .add_office(office)
        .build()
        .expect("floor builds");

    assert_eq!(booted.load(Ordering::SeqCst), 0, "startup flows must not run before open");
    floor.open().expect("floor opens");
    assert_eq!(booted.load(Ordering::SeqCst), 1, "startup flow runs during open");
    floor.close();
}

/// A source acting as an external trigger: it keeps the context from
/// `start` and invokes a process when fired.
struct TriggerSource {
    context: Mutex<Option<SourceContext>>,
}

impl ManagedObjectSource for TriggerSource {
    fn start(&self, context: &SourceContext) -> anyhow::Result<()> {
        *self.context.lock().expect("context lock") = Some(context.clone());
        Ok(())
    }

    fn source(&self, sourcing: Sourcing) {
        sourcing.set_object(Arc::new(()));
    }
}

#[test]
fn a_source_can_trigger_processes_after_open() {
    let source = Arc::new(TriggerSource {
        context: Mutex::new(None),
    });
    let handled = Arc::new(AtomicUsize::new(0));
    let handled_count = handled.clone();

    let office = OfficeBuilder::new("gateway")
        .add_object(loft_engine::ObjectBuilder::new("listener", loft_engine::Scope::Process, source.clone()))
        .add_work(
            WorkBuilder::new("requests").add_task(TaskBuilder::new("handle", "main", move |context: &mut loft_engine::TaskContext| {
                assert_eq!(context.parameter()["request"], 1);
                handled_count.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            })),
        );

    let mut floor = OfficeFloorBuilder::new()
        .add_team("main", PassiveTeam::new("main"))
        .add_office(office)
        .build()
        .expect("floor builds");
    floor.open().expect("floor opens");

    let context = source.context.lock().expect("context lock").clone().expect("start handed out the context");
    let (callback, receiver) = completion();
    context
        .invoke_process("requests.handle", json!({ "request": 1 }), Some(callback))
        .expect("trigger accepted");

    assert!(wait_outcome(&receiver).is_completed());
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    floor.close();
}
