use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    time::Duration,
};

use loft_engine::{
    CompletionCallback, Extension, ManagedObject, ManagedObjectPool, ManagedObjectSource, ObjectBuilder, OfficeBuilder,
    OfficeFloorBuilder, PassiveTeam, ProcessOutcome, Scope, Sourcing, TaskBuilder, WorkBuilder, match_any, match_type,
};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("order rejected")]
struct OrderRejected;

#[derive(Debug, Error)]
#[error("ledger unavailable")]
struct LedgerUnavailable;

struct InstantSource;

impl ManagedObjectSource for InstantSource {
    fn source(&self, sourcing: Sourcing) {
        sourcing.set_object(Arc::new(()));
    }
}

struct CountingPool {
    lost: AtomicUsize,
    returned: AtomicUsize,
}

impl ManagedObjectPool for CountingPool {
    fn source_new_object(&self) -> anyhow::Result<ManagedObject> {
        Ok(Arc::new(()))
    }

    fn return_object(&self, _object: ManagedObject) {
        self.returned.fetch_add(1, Ordering::SeqCst);
    }

    fn lost_object(&self, _object: ManagedObject, _cause: Option<&anyhow::Error>) {
        self.lost.fetch_add(1, Ordering::SeqCst);
    }
}

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

fn log() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn push(log: &Arc<Mutex<Vec<String>>>, entry: &str) {
    log.lock().expect("log lock").push(entry.to_string());
}

fn run(floor: &mut loft_engine::OfficeFloor, office: &str, function: &str) -> ProcessOutcome {
    floor.open().expect("floor opens");
    let (callback, receiver) = completion();
    floor
        .office(office)
        .expect("office registered")
        .function_manager(function)
        .expect("function exists")
        .invoke_process(Value::Null, Some(callback))
        .expect("invocation accepted");
    wait_outcome(&receiver)
}

#[test]
fn work_level_handler_is_consulted_first() {
    let log = log();
    let place_log = log.clone();
    let work_log = log.clone();
    let office_log = log.clone();

    let office = OfficeBuilder::new("shop")
        .add_work(
            WorkBuilder::new("orders")
                .add_task(TaskBuilder::new("place", "main", move |_context: &mut loft_engine::TaskContext| {
                    push(&place_log, "place");
                    Err(anyhow::Error::new(OrderRejected))
                }))
                .add_task(TaskBuilder::new("recover", "main", move |context: &mut loft_engine::TaskContext| {
                    let escalation = context.escalation().expect("handler receives the escalation");
                    assert_eq!(escalation.task, "orders.place");
                    assert!(escalation.cause.downcast_ref::<OrderRejected>().is_some(), "cause retains its type");
                    push(&work_log, "work-recover");
                    Ok(Value::Null)
                }))
                .escalation(match_type::<OrderRejected>(), "recover"),
        )
        .add_work(
            WorkBuilder::new("recovery").add_task(TaskBuilder::new("handle", "main", move |_context: &mut loft_engine::TaskContext| {
                push(&office_log, "office-recover");
                Ok(Value::Null)
            })),
        )
        .escalation(match_any(), "recovery.handle");

    let mut floor = OfficeFloorBuilder::new()
        .add_team("main", PassiveTeam::new("main"))
        .add_office(office)
        .build()
        .expect("floor builds");

    let outcome = run(&mut floor, "shop", "orders.place");
    assert!(outcome.is_completed(), "a handled failure completes the process: {outcome:?}");
    assert_eq!(
        *log.lock().expect("log lock"),
        vec!["place", "work-recover"],
        "the work-level handler must win over the office-level one"
    );
    floor.close();
}

#[test]
fn office_level_handler_catches_when_the_work_has_none() {
    let log = log();
    let handler_log = log.clone();

    let office = OfficeBuilder::new("shop")
        .add_work(WorkBuilder::new("orders").add_task(TaskBuilder::new("place", "main", |_context: &mut loft_engine::TaskContext| {
            Err(anyhow::Error::new(OrderRejected))
        })))
        .add_work(
            WorkBuilder::new("recovery").add_task(TaskBuilder::new("handle", "main", move |_context: &mut loft_engine::TaskContext| {
                push(&handler_log, "office-recover");
                Ok(Value::Null)
            })),
        )
        .escalation(match_type::<OrderRejected>(), "recovery.handle");

    let mut floor = OfficeFloorBuilder::new()
        .add_team("main", PassiveTeam::new("main"))
        .add_office(office)
        .build()
        .expect("floor builds");

    assert!(run(&mut floor, "shop", "orders.place").is_completed());
    assert_eq!(*log.lock().expect("log lock"), vec!["office-recover"]);
    floor.close();
}

#[test]
fn floor_default_catches_when_the_office_has_no_match() {
    let log = log();
    let handler_log = log.clone();

    let office = OfficeBuilder::new("shop")
        .add_work(WorkBuilder::new("orders").add_task(TaskBuilder::new("place", "main", |_context: &mut loft_engine::TaskContext| {
            Err(anyhow::Error::new(OrderRejected))
        })))
        .add_work(
            WorkBuilder::new("recovery")
                .add_task(TaskBuilder::new("unrelated", "main", |_context: &mut loft_engine::TaskContext| Ok(Value::Null)))
                .add_task(TaskBuilder::new("last_resort", "main", move |_context: &mut loft_engine::TaskContext| {
                    push(&handler_log, "floor-default");
                    Ok(Value::Null)
                })),
        )
        // An office handler that cannot match this failure.
        .escalation(match_type::<LedgerUnavailable>(), "recovery.unrelated");

    let mut floor = OfficeFloorBuilder::new()
        .add_team("main", PassiveTeam::new("main"))
        .add_office(office)
        .default_escalation("shop", "recovery.last_resort")
        .build()
        .expect("floor builds");

    assert!(run(&mut floor, "shop", "orders.place").is_completed());
    assert_eq!(*log.lock().expect("log lock"), vec!["floor-default"]);
    floor.close();
}

#[test]
fn terminal_handler_fails_the_process_and_still_releases_containers() {
    let pool = Arc::new(CountingPool {
        lost: AtomicUsize::new(0),
        returned: AtomicUsize::new(0),
    });

    let office = OfficeBuilder::new("shop")
        .add_object(ObjectBuilder::new("store", Scope::Process, Arc::new(InstantSource)).pooled(pool.clone()))
        .add_work(
            WorkBuilder::new("orders").add_task(
                TaskBuilder::new("place", "main", |_context: &mut loft_engine::TaskContext| Err(anyhow::Error::new(OrderRejected)))
                    .object("store"),
            ),
        );

    let mut floor = OfficeFloorBuilder::new()
        .add_team("main", PassiveTeam::new("main"))
        .add_office(office)
        .build()
        .expect("floor builds");

    match run(&mut floor, "shop", "orders.place") {
        ProcessOutcome::Failed { message } => {
            assert!(message.contains("order rejected"), "unexpected terminal message: {message}");
        }
        other => panic!("expected a failed process, got {other:?}"),
    }
    assert_eq!(pool.lost.load(Ordering::SeqCst), 1, "a failed process surrenders its pooled instances");
    assert_eq!(pool.returned.load(Ordering::SeqCst), 0);
    floor.close();
}

#[test]
fn failing_handler_skips_the_office_procedure_and_uses_the_floor_default() {
    let log = log();
    let recover_log = log.clone();
    let last_log = log.clone();

    let office = OfficeBuilder::new("shop")
        .add_work(WorkBuilder::new("orders").add_task(TaskBuilder::new("place", "main", |_context: &mut loft_engine::TaskContext| {
            Err(anyhow::Error::new(OrderRejected))
        })))
        .add_work(
            WorkBuilder::new("recovery")
                .add_task(TaskBuilder::new("recover", "main", move |_context: &mut loft_engine::TaskContext| {
                    push(&recover_log, "recover");
                    Err(anyhow::anyhow!("recovery also failed"))
                }))
                .add_task(TaskBuilder::new("last_resort", "main", move |context: &mut loft_engine::TaskContext| {
                    let escalation = context.escalation().expect("handler receives the escalation");
                    assert!(escalation.from_handler, "a handler failure must be marked as such");
                    push(&last_log, "last-resort");
                    Ok(Value::Null)
                })),
        )
        .escalation(match_any(), "recovery.recover");

    let mut floor = OfficeFloorBuilder::new()
        .add_team("main", PassiveTeam::new("main"))
        .add_office(office)
        .default_escalation("shop", "recovery.last_resort")
        .build()
        .expect("floor builds");

    assert!(run(&mut floor, "shop", "orders.place").is_completed());
    assert_eq!(
        *log.lock().expect("log lock"),
        vec!["recover", "last-resort"],
        "the failing handler must not be re-entered"
    );
    floor.close();
}

#[test]
fn duty_failure_escalates_like_a_task_failure() {
    let log = log();
    let body_log = log.clone();
    let handler_log = log.clone();

    let office = OfficeBuilder::new("shop")
        .add_object(
            ObjectBuilder::new("ledger", Scope::Process, Arc::new(InstantSource))
                .extension(|object| object.clone()),
        )
        .add_administrator(
            loft_engine::AdministratorBuilder::new("audit", Scope::Process).add_duty(loft_engine::DutyBuilder::new(
                "check",
                |_extensions: &[Extension], _context: &mut loft_engine::DutyContext| Err(anyhow::Error::new(LedgerUnavailable)),
            )
            .administer("ledger")),
        )
        .add_work(
            WorkBuilder::new("orders")
                .add_task(
                    TaskBuilder::new("place", "main", move |_context: &mut loft_engine::TaskContext| {
                        push(&body_log, "body");
                        Ok(Value::Null)
                    })
                    .pre_duty("audit.check"),
                )
                .add_task(TaskBuilder::new("recover", "main", move |context: &mut loft_engine::TaskContext| {
                    let escalation = context.escalation().expect("handler receives the escalation");
                    assert_eq!(escalation.task, "orders.place", "the duty failure belongs to its task");
                    push(&handler_log, "recover");
                    Ok(Value::Null)
                })),
        )
        .escalation(match_type::<LedgerUnavailable>(), "orders.recover");

    let mut floor = OfficeFloorBuilder::new()
        .add_team("main", PassiveTeam::new("main"))
        .add_office(office)
        .build()
        .expect("floor builds");

    assert!(run(&mut floor, "shop", "orders.place").is_completed());
    assert_eq!(
        *log.lock().expect("log lock"),
        vec!["recover"],
        "a failing pre-duty must prevent the body from running"
    );
    floor.close();
}
