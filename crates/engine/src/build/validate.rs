//! Resolution and validation of a floor declaration.
//!
//! Every name becomes an index here; scope rules, dependency cycles, team
//! references, duty references, and extension availability are all checked
//! before any runtime structure exists. The cycle check is Kahn's algorithm
//! over the managed-object dependency graph.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, atomic::AtomicBool},
};

use indexmap::IndexMap;
use loft_types::Scope;
use loft_util::Sequence;

use crate::{
    build::builders::{OfficeBuilder, OfficeFloorBuilder},
    error::BuildError,
    escalation::{EscalationHandler, EscalationProcedure},
    floor::{OfficeFloor, Timer},
    meta::{
        admin::{AdministratorMetaData, DutyMetaData},
        flow::FlowMetaData,
        object::{ManagedObjectMetaData, ObjectRef},
        task::{DutyRef, TaskMetaData, TaskRef, WorkMetaData},
    },
    office::Office,
    team::registry::TeamRegistry,
};

pub(crate) fn build(builder: OfficeFloorBuilder) -> Result<OfficeFloor, BuildError> {
    let mut registry = TeamRegistry::new();
    for (name, team) in builder.teams {
        registry.register(name, team)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("loft-timer")
        .enable_all()
        .build()
        .map_err(|error| BuildError::Runtime {
            reason: error.to_string(),
        })?;
    let timer = Timer::new(runtime.handle().clone());

    let default_escalation = builder.default_escalation;
    let mut default_office_seen = default_escalation.is_none();

    let mut offices: IndexMap<String, Arc<Office>> = IndexMap::new();
    for office_builder in builder.offices {
        if offices.contains_key(&office_builder.name) {
            return Err(BuildError::DuplicateOffice {
                name: office_builder.name,
            });
        }
        let default_task = match &default_escalation {
            Some((office, task)) if *office == office_builder.name => {
                default_office_seen = true;
                Some(task.clone())
            }
            _ => None,
        };
        let office = build_office(office_builder, &registry, timer.clone(), default_task)?;
        offices.insert(office.name().to_string(), office);
    }

    if !default_office_seen
        && let Some((office, _)) = default_escalation
    {
        return Err(BuildError::UnknownEscalationOffice { office });
    }

    Ok(OfficeFloor::new(registry, offices, runtime))
}

fn scope_slot(scope: Scope) -> usize {
    match scope {
        Scope::Process => 0,
        Scope::Thread => 1,
        Scope::Work => 2,
    }
}

/// Leaf-first dependency closure of one object, ending with the object
/// itself. Memoised per position; the graph is already known to be acyclic.
fn compute_closure(position: usize, dep_positions: &[Vec<usize>], refs: &[ObjectRef], memo: &mut [Option<Vec<ObjectRef>>]) -> Vec<ObjectRef> {
    if let Some(existing) = &memo[position] {
        return existing.clone();
    }
    let mut order: Vec<ObjectRef> = Vec::new();
    for &dependency in &dep_positions[position] {
        for item in compute_closure(dependency, dep_positions, refs, memo) {
            if !order.contains(&item) {
                order.push(item);
            }
        }
    }
    order.push(refs[position]);
    memo[position] = Some(order.clone());
    order
}

fn build_office(
    builder: OfficeBuilder,
    registry: &TeamRegistry,
    timer: Timer,
    default_task: Option<String>,
) -> Result<Arc<Office>, BuildError> {
    let office_name = builder.name.clone();

    // Bind objects: name -> (scope, index into that scope's table).
    let mut objects_by_name: IndexMap<String, ObjectRef> = IndexMap::new();
    let mut scope_counts = [0usize; 3];
    for object in &builder.objects {
        if objects_by_name.contains_key(&object.name) {
            return Err(BuildError::DuplicateObject {
                office: office_name,
                name: object.name.clone(),
            });
        }
        let slot = scope_slot(object.scope);
        objects_by_name.insert(
            object.name.clone(),
            ObjectRef {
                scope: object.scope,
                index: scope_counts[slot],
            },
        );
        scope_counts[slot] += 1;
    }

    // Resolve dependencies and enforce the scope rule: a dependency must
    // live at least as long as its dependent.
    let count = builder.objects.len();
    let mut direct_deps: Vec<Vec<ObjectRef>> = Vec::with_capacity(count);
    let mut dep_positions: Vec<Vec<usize>> = Vec::with_capacity(count);
    for object in &builder.objects {
        let mut refs = Vec::with_capacity(object.dependencies.len());
        let mut positions = Vec::with_capacity(object.dependencies.len());
        for dependency in &object.dependencies {
            let dep_ref = objects_by_name
                .get(dependency)
                .copied()
                .ok_or_else(|| BuildError::unknown_object(&office_name, &object.name, dependency))?;
            if !dep_ref.scope.outlives(object.scope) {
                return Err(BuildError::ScopeViolation {
                    office: office_name,
                    object: object.name.clone(),
                    scope: object.scope,
                    dependency: dependency.clone(),
                    dependency_scope: dep_ref.scope,
                });
            }
            refs.push(dep_ref);
            positions.push(objects_by_name.get_index_of(dependency).expect("dependency resolved above"));
        }
        direct_deps.push(refs);
        dep_positions.push(positions);
    }

    // Cycle detection over the dependency graph (Kahn's algorithm).
    let mut in_degrees = vec![0usize; count];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (position, positions) in dep_positions.iter().enumerate() {
        let mut seen = HashSet::new();
        for &dependency in positions {
            if !seen.insert(dependency) {
                continue;
            }
            in_degrees[position] += 1;
            adjacency[dependency].push(position);
        }
    }
    let mut queue: VecDeque<usize> = (0..count).filter(|position| in_degrees[*position] == 0).collect();
    let mut visited = 0usize;
    while let Some(position) = queue.pop_front() {
        visited += 1;
        for &child in &adjacency[position] {
            in_degrees[child] -= 1;
            if in_degrees[child] == 0 {
                queue.push_back(child);
            }
        }
    }
    if visited != count {
        let mut remaining: Vec<String> = objects_by_name
            .keys()
            .enumerate()
            .filter(|(position, _)| in_degrees[*position] > 0)
            .map(|(_, name)| name.clone())
            .collect();
        remaining.sort();
        return Err(BuildError::DependencyCycle {
            office: office_name,
            objects: remaining.join(", "),
        });
    }

    // Leaf-first load orders, computed once.
    let refs_by_position: Vec<ObjectRef> = objects_by_name.values().copied().collect();
    let mut memo: Vec<Option<Vec<ObjectRef>>> = vec![None; count];
    let closures: Vec<Vec<ObjectRef>> = (0..count)
        .map(|position| compute_closure(position, &dep_positions, &refs_by_position, &mut memo))
        .collect();
    let positions_by_ref: HashMap<ObjectRef, usize> = refs_by_position.iter().enumerate().map(|(position, r)| (*r, position)).collect();

    // Task name table; every task gets a flat index in declaration order.
    let mut functions: IndexMap<String, TaskRef> = IndexMap::new();
    let mut work_names: HashSet<String> = HashSet::new();
    let mut flat = 0usize;
    for work in &builder.works {
        if !work_names.insert(work.name.clone()) {
            return Err(BuildError::DuplicateWork {
                office: office_name,
                name: work.name.clone(),
            });
        }
        if work.tasks.is_empty() {
            return Err(BuildError::EmptyWork {
                office: office_name,
                work: work.name.clone(),
            });
        }
        for task in &work.tasks {
            let qualified = format!("{}.{}", work.name, task.name);
            if functions.contains_key(&qualified) {
                return Err(BuildError::DuplicateTask {
                    office: office_name,
                    name: qualified,
                });
            }
            functions.insert(qualified, TaskRef(flat));
            flat += 1;
        }
    }

    let resolve_task = |current_work: Option<&str>, referrer: &str, name: &str| -> Result<TaskRef, BuildError> {
        let qualified = if name.contains('.') {
            name.to_string()
        } else if let Some(work) = current_work {
            format!("{work}.{name}")
        } else {
            name.to_string()
        };
        functions
            .get(&qualified)
            .copied()
            .ok_or_else(|| BuildError::unknown_task(&office_name, referrer, name))
    };

    // Object metas: initialise sources and resolve recycle tasks.
    let mut process_objects: Vec<Arc<ManagedObjectMetaData>> = Vec::new();
    let mut thread_objects: Vec<Arc<ManagedObjectMetaData>> = Vec::new();
    let mut work_objects: Vec<Arc<ManagedObjectMetaData>> = Vec::new();
    for (position, object) in builder.objects.iter().enumerate() {
        object
            .source
            .init(&object.properties)
            .map_err(|error| BuildError::source_init(&office_name, &object.name, error.to_string()))?;
        let recycle = match &object.recycle {
            Some(task) => Some(resolve_task(None, &object.name, task)?),
            None => None,
        };
        let meta = Arc::new(ManagedObjectMetaData {
            name: object.name.clone(),
            scope: object.scope,
            source: object.source.clone(),
            dependencies: direct_deps[position].clone(),
            load_order: closures[position].clone(),
            timeout: object.timeout,
            pool: object.pool.clone(),
            recycle,
            extension: object.extension.clone(),
        });
        match object.scope {
            Scope::Process => process_objects.push(meta),
            Scope::Thread => thread_objects.push(meta),
            Scope::Work => work_objects.push(meta),
        }
    }

    // Administrators and duties; administered objects must expose an
    // extension, and a mismatch is a configuration error, not a runtime one.
    let mut duty_lookup: IndexMap<String, DutyRef> = IndexMap::new();
    let mut administrators: Vec<Arc<AdministratorMetaData>> = Vec::new();
    let mut administrator_names: HashSet<String> = HashSet::new();
    for (admin_index, admin) in builder.administrators.iter().enumerate() {
        if !administrator_names.insert(admin.name.clone()) {
            return Err(BuildError::DuplicateAdministrator {
                office: office_name.clone(),
                name: admin.name.clone(),
            });
        }
        let mut duties = Vec::new();
        for (duty_index, duty) in admin.duties.iter().enumerate() {
            let qualified = format!("{}.{}", admin.name, duty.name);
            if duty_lookup.contains_key(&qualified) {
                return Err(BuildError::DuplicateDuty {
                    office: office_name.clone(),
                    name: qualified,
                });
            }
            duty_lookup.insert(
                qualified.clone(),
                DutyRef {
                    administrator: admin_index,
                    duty: duty_index,
                },
            );
            let mut object_refs = Vec::with_capacity(duty.objects.len());
            for object_name in &duty.objects {
                let object_ref = objects_by_name
                    .get(object_name)
                    .copied()
                    .ok_or_else(|| BuildError::unknown_object(&office_name, &qualified, object_name))?;
                let position = objects_by_name.get_index_of(object_name).expect("administered object resolved above");
                if builder.objects[position].extension.is_none() {
                    return Err(BuildError::MissingExtension {
                        office: office_name.clone(),
                        duty: qualified,
                        object: object_name.clone(),
                    });
                }
                object_refs.push(object_ref);
            }
            let flows = duty
                .flows
                .iter()
                .map(|(target, strategy)| {
                    Ok(FlowMetaData {
                        target: resolve_task(None, &qualified, target)?,
                        strategy: *strategy,
                    })
                })
                .collect::<Result<Vec<_>, BuildError>>()?;
            duties.push(DutyMetaData {
                name: duty.name.clone(),
                logic: duty.logic.clone(),
                objects: object_refs,
                flows,
            });
        }
        administrators.push(Arc::new(AdministratorMetaData {
            name: admin.name.clone(),
            scope: admin.scope,
            duties,
        }));
    }

    // Teams are resolved to direct references, indexed in order of first use.
    let mut team_names: Vec<String> = Vec::new();
    let mut teams = Vec::new();
    let mut resolve_team = |task_name: &str, team_name: &str| -> Result<usize, BuildError> {
        if let Some(index) = team_names.iter().position(|name| name == team_name) {
            return Ok(index);
        }
        let team = registry
            .team(team_name)
            .ok_or_else(|| BuildError::unknown_team(&office_name, task_name, team_name))?;
        team_names.push(team_name.to_string());
        teams.push(team);
        Ok(team_names.len() - 1)
    };

    // Task and work metas.
    let mut tasks: Vec<Arc<TaskMetaData>> = Vec::new();
    let mut works: Vec<Arc<WorkMetaData>> = Vec::new();
    let mut flat = 0usize;
    for (work_index, work) in builder.works.iter().enumerate() {
        let mut work_tasks = Vec::new();
        for task in &work.tasks {
            let qualified = format!("{}.{}", work.name, task.name);
            let team = resolve_team(&qualified, &task.team)?;

            let mut declared = Vec::with_capacity(task.objects.len());
            for object_name in &task.objects {
                declared.push(
                    objects_by_name
                        .get(object_name)
                        .copied()
                        .ok_or_else(|| BuildError::unknown_object(&office_name, &qualified, object_name))?,
                );
            }
            let async_checks: Vec<ObjectRef> = task
                .async_objects
                .iter()
                .map(|object_name| *objects_by_name.get(object_name).expect("async object also declared"))
                .collect();

            let mut pre_duties = Vec::with_capacity(task.pre_duties.len());
            for duty_name in &task.pre_duties {
                pre_duties.push(duty_lookup.get(duty_name).copied().ok_or_else(|| BuildError::UnknownDuty {
                    office: office_name.clone(),
                    task: qualified.clone(),
                    duty: duty_name.clone(),
                })?);
            }
            let mut post_duties = Vec::with_capacity(task.post_duties.len());
            for duty_name in &task.post_duties {
                post_duties.push(duty_lookup.get(duty_name).copied().ok_or_else(|| BuildError::UnknownDuty {
                    office: office_name.clone(),
                    task: qualified.clone(),
                    duty: duty_name.clone(),
                })?);
            }

            // Everything the task must have ready, dependencies first.
            let mut load_order: Vec<ObjectRef> = Vec::new();
            let push_closure = |load_order: &mut Vec<ObjectRef>, object_ref: ObjectRef| {
                let position = positions_by_ref[&object_ref];
                for item in &closures[position] {
                    if !load_order.contains(item) {
                        load_order.push(*item);
                    }
                }
            };
            for object_ref in &declared {
                push_closure(&mut load_order, *object_ref);
            }
            for duty_ref in pre_duties.iter().chain(post_duties.iter()) {
                let duty = &administrators[duty_ref.administrator].duties[duty_ref.duty];
                for object_ref in &duty.objects {
                    push_closure(&mut load_order, *object_ref);
                }
            }

            let next = match &task.next {
                Some(name) => Some(resolve_task(Some(&work.name), &qualified, name)?),
                None => None,
            };
            let flows = task
                .flows
                .iter()
                .map(|(target, strategy)| {
                    Ok(FlowMetaData {
                        target: resolve_task(Some(&work.name), &qualified, target)?,
                        strategy: *strategy,
                    })
                })
                .collect::<Result<Vec<_>, BuildError>>()?;

            tasks.push(Arc::new(TaskMetaData {
                name: qualified,
                work: work_index,
                team,
                logic: task.logic.clone(),
                objects: declared,
                async_checks,
                load_order,
                pre_duties,
                post_duties,
                next,
                flows,
            }));
            work_tasks.push(TaskRef(flat));
            flat += 1;
        }

        let mut escalations = EscalationProcedure::new();
        for (matcher, target) in &work.escalations {
            escalations.push(EscalationHandler::new(
                matcher.clone(),
                resolve_task(Some(&work.name), &work.name, target)?,
            ));
        }
        let initial = match &work.initial {
            Some(name) => resolve_task(Some(&work.name), &work.name, name)?,
            None => work_tasks[0],
        };
        works.push(Arc::new(WorkMetaData {
            name: work.name.clone(),
            initial,
            tasks: work_tasks,
            escalations,
        }));
    }

    let mut escalations = EscalationProcedure::new();
    for (matcher, target) in &builder.escalations {
        escalations.push(EscalationHandler::new(matcher.clone(), resolve_task(None, "office escalation", target)?));
    }
    let floor_default = match default_task {
        Some(task) => Some(EscalationHandler::catch_all(resolve_task(None, "default escalation", &task)?)),
        None => None,
    };
    let mut startup = Vec::with_capacity(builder.startup.len());
    for (task, parameter) in &builder.startup {
        startup.push((resolve_task(None, "startup", task)?, parameter.clone()));
    }

    Ok(Arc::new(Office {
        name: office_name,
        works,
        tasks,
        functions,
        objects_by_name,
        process_objects: Arc::new(process_objects),
        thread_objects: Arc::new(thread_objects),
        work_objects: Arc::new(work_objects),
        administrators,
        teams,
        team_names,
        escalations,
        floor_default,
        startup,
        listeners: Arc::new(builder.listeners),
        timer,
        ids: Sequence::new(),
        open: AtomicBool::new(false),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        build::builders::{DutyBuilder, ObjectBuilder, OfficeFloorBuilder, TaskBuilder, WorkBuilder},
        build::builders::{AdministratorBuilder, OfficeBuilder},
        container::Sourcing,
        escalation::match_any,
        execute::context::TaskContext,
        plugin::{Extension, ManagedObjectSource},
        team::passive::PassiveTeam,
    };
    use serde_json::Value;
    use std::sync::Arc;

    struct NullSource;

    impl ManagedObjectSource for NullSource {
        fn source(&self, sourcing: Sourcing) {
            sourcing.set_object(Arc::new(()));
        }
    }

    fn noop(_context: &mut TaskContext) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }

    fn one_task_office() -> OfficeBuilder {
        OfficeBuilder::new("orders").add_work(WorkBuilder::new("intake").add_task(TaskBuilder::new("receive", "main", noop)))
    }

    #[test]
    fn builds_a_minimal_floor() {
        let floor = OfficeFloorBuilder::new()
            .add_team("main", PassiveTeam::new("main"))
            .add_office(one_task_office())
            .build()
            .expect("minimal floor builds");
        assert!(floor.office("orders").is_some());
        assert!(floor.office("missing").is_none());
    }

    #[test]
    fn unknown_team_is_a_build_error() {
        let error = OfficeFloorBuilder::new()
            .add_office(one_task_office())
            .build()
            .expect_err("unknown team");
        assert!(matches!(error, BuildError::UnknownTeam { .. }), "unexpected error: {error}");
    }

    #[test]
    fn dependency_cycle_is_a_build_error() {
        let office = OfficeBuilder::new("orders")
            .add_object(
                ObjectBuilder::new("first", Scope::Process, Arc::new(NullSource)).depends_on("second"),
            )
            .add_object(
                ObjectBuilder::new("second", Scope::Process, Arc::new(NullSource)).depends_on("first"),
            )
            .add_work(WorkBuilder::new("intake").add_task(TaskBuilder::new("receive", "main", noop)));
        let error = OfficeFloorBuilder::new()
            .add_team("main", PassiveTeam::new("main"))
            .add_office(office)
            .build()
            .expect_err("cycle");
        match error {
            BuildError::DependencyCycle { objects, .. } => {
                assert!(objects.contains("first") && objects.contains("second"), "unexpected members: {objects}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn narrower_scoped_dependency_is_a_build_error() {
        let office = OfficeBuilder::new("orders")
            .add_object(ObjectBuilder::new("request", Scope::Work, Arc::new(NullSource)))
            .add_object(
                ObjectBuilder::new("session", Scope::Process, Arc::new(NullSource)).depends_on("request"),
            )
            .add_work(WorkBuilder::new("intake").add_task(TaskBuilder::new("receive", "main", noop)));
        let error = OfficeFloorBuilder::new()
            .add_team("main", PassiveTeam::new("main"))
            .add_office(office)
            .build()
            .expect_err("scope violation");
        assert!(matches!(error, BuildError::ScopeViolation { .. }), "unexpected error: {error}");
    }

    #[test]
    fn duplicate_task_is_a_build_error() {
        let office = OfficeBuilder::new("orders").add_work(
            WorkBuilder::new("intake")
                .add_task(TaskBuilder::new("receive", "main", noop))
                .add_task(TaskBuilder::new("receive", "main", noop)),
        );
        let error = OfficeFloorBuilder::new()
            .add_team("main", PassiveTeam::new("main"))
            .add_office(office)
            .build()
            .expect_err("duplicate task");
        assert!(matches!(error, BuildError::DuplicateTask { .. }), "unexpected error: {error}");
    }

    #[test]
    fn administered_object_without_extension_is_a_build_error() {
        fn audit(_extensions: &[Extension], _context: &mut crate::execute::context::DutyContext) -> anyhow::Result<()> {
            Ok(())
        }
        let office = OfficeBuilder::new("orders")
            .add_object(ObjectBuilder::new("ledger", Scope::Process, Arc::new(NullSource)))
            .add_administrator(AdministratorBuilder::new("audit", Scope::Process).add_duty(DutyBuilder::new("record", audit).administer("ledger")))
            .add_work(WorkBuilder::new("intake").add_task(TaskBuilder::new("receive", "main", noop)));
        let error = OfficeFloorBuilder::new()
            .add_team("main", PassiveTeam::new("main"))
            .add_office(office)
            .build()
            .expect_err("missing extension");
        assert!(matches!(error, BuildError::MissingExtension { .. }), "unexpected error: {error}");
    }

    #[test]
    fn load_order_places_dependencies_first() {
        let office = OfficeBuilder::new("orders")
            .add_object(
                ObjectBuilder::new("session", Scope::Process, Arc::new(NullSource)).depends_on("credentials"),
            )
            .add_object(ObjectBuilder::new("credentials", Scope::Process, Arc::new(NullSource)))
            .add_work(
                WorkBuilder::new("intake").add_task(TaskBuilder::new("receive", "main", noop).object("session")),
            );
        let floor = OfficeFloorBuilder::new()
            .add_team("main", PassiveTeam::new("main"))
            .add_office(office)
            .build()
            .expect("floor builds");
        let office = floor.office("orders").expect("office exists");
        let task = office.task(TaskRef(0));
        assert_eq!(task.load_order.len(), 2);
        // credentials (index 1 in the process table) must come first.
        assert_eq!(task.load_order[0].index, 1);
        assert_eq!(task.load_order[1].index, 0);
    }

    #[test]
    fn default_escalation_requires_a_known_office() {
        let error = OfficeFloorBuilder::new()
            .add_team("main", PassiveTeam::new("main"))
            .add_office(one_task_office())
            .default_escalation("missing", "intake.receive")
            .build()
            .expect_err("unknown office");
        assert!(matches!(error, BuildError::UnknownEscalationOffice { .. }), "unexpected error: {error}");
    }

    #[test]
    fn office_escalation_targets_must_resolve() {
        let office = one_task_office().escalation(match_any(), "intake.missing");
        let error = OfficeFloorBuilder::new()
            .add_team("main", PassiveTeam::new("main"))
            .add_office(office)
            .build()
            .expect_err("unknown escalation target");
        assert!(matches!(error, BuildError::UnknownTask { .. }), "unexpected error: {error}");
    }
}
