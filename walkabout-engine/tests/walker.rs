use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use walkabout_core::EntityId;
use walkabout_engine::{
    EntityHooks, HookFuture, Outcome, Target, Traversal, Visit, WalkerSpec, WalkerState,
};
use walkabout_graph::{ConnectOptions, Direction, GraphContext, KindRegistry, Node};
use walkabout_store::MemoryBackend;

fn memory_context() -> Arc<GraphContext> {
    GraphContext::new(
        Arc::new(MemoryBackend::new()),
        Arc::new(KindRegistry::new()),
    )
}

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
}

async fn two_cities(ctx: &Arc<GraphContext>) -> (Node, Node) {
    walkabout_graph::with_context(ctx.clone(), async {
        let mut a = Node::create("City", fields(json!({"name": "NYC"}))).await.unwrap();
        let mut b = Node::create("City", fields(json!({"name": "Boston"}))).await.unwrap();
        a.connect(
            &mut b,
            ConnectOptions::kind("Highway").field("distance", json!(215)),
        )
        .await
        .unwrap();
        (a, b)
    })
    .await
}

#[derive(Deserialize, Default)]
struct Sightseer {
    #[serde(default)]
    hops: u32,
}

fn sightsee<'a>(w: &'a mut Sightseer, v: &'a mut Visit<'_>) -> HookFuture<'a> {
    Box::pin(async move {
        let name = v.here().get("name").cloned().unwrap_or(Value::Null);
        v.report(name);
        // Only fan out from the start node.
        if w.hops == 0 {
            w.hops += 1;
            let node = v.here().as_node().cloned().unwrap();
            let neighbors = v.ctx().neighbors_of(&node, None, None).await?;
            let ids: Vec<EntityId> = neighbors.into_iter().map(|n| n.id).collect();
            v.visit(ids).await?;
        }
        Ok(Outcome::Continue)
    })
}

#[tokio::test]
async fn connect_and_traverse_reports_in_order() {
    let ctx = memory_context();
    let (a, _b) = two_cities(&ctx).await;
    let spec = WalkerSpec::builder::<Sightseer>("Sightseer")
        .on_node_kind("City", sightsee)
        .record_trail()
        .build();
    let mut run = Traversal::decode(spec, ctx.clone(), &json!({})).unwrap();
    walkabout_graph::with_context(ctx, run.run(a.id.clone())).await.unwrap();
    assert_eq!(run.state(), WalkerState::Done);

    let response = run.into_response();
    assert_eq!(response["reports"], json!(["NYC", "Boston"]));
    // Trail records the hop edge between the two city visits.
    let trail = response["trail"].as_array().unwrap();
    assert_eq!(trail.len(), 3);
    assert!(trail[0].as_str().unwrap().starts_with("n:City:"));
    assert!(trail[1].as_str().unwrap().starts_with("e:Highway:"));
    assert!(trail[2].as_str().unwrap().starts_with("n:City:"));
}

fn hop_from_start<'a>(w: &'a mut Sightseer, v: &'a mut Visit<'_>) -> HookFuture<'a> {
    sightsee(w, v)
}

fn report_hop<'a>(_w: &'a mut Sightseer, v: &'a mut Visit<'_>) -> HookFuture<'a> {
    Box::pin(async move {
        let distance = v.here().get("distance").cloned().unwrap_or(Value::Null);
        v.report(json!({"hop": distance}));
        Ok(Outcome::Continue)
    })
}

#[tokio::test]
async fn edge_hooks_fire_on_the_hop() {
    let ctx = memory_context();
    let (a, _b) = two_cities(&ctx).await;
    let spec = WalkerSpec::builder::<Sightseer>("Sightseer")
        .on_node_kind("City", hop_from_start)
        .build();
    let hooks = Arc::new(EntityHooks::new());
    hooks.on_edge_visit::<Sightseer>("Highway", Target::Any, report_hop);
    let mut run = Traversal::decode(spec, ctx.clone(), &json!({}))
        .unwrap()
        .with_entity_hooks(hooks);
    walkabout_graph::with_context(ctx, run.run(a.id.clone())).await.unwrap();
    let response = run.into_response();
    assert_eq!(
        response["reports"],
        json!(["NYC", {"hop": 215}, "Boston"])
    );
}

#[derive(Deserialize, Default)]
struct LoopWalker {}

fn keep_looping<'a>(_w: &'a mut LoopWalker, v: &'a mut Visit<'_>) -> HookFuture<'a> {
    Box::pin(async move {
        let node = v.here().as_node().cloned().unwrap();
        let neighbors = v.ctx().neighbors_of(&node, None, None).await?;
        v.visit(neighbors.into_iter().map(|n| n.id)).await?;
        Ok(Outcome::Continue)
    })
}

#[tokio::test]
async fn visit_cap_terminates_with_limit_error_and_bounded_trail() {
    let ctx = memory_context();
    let (a, _b) = two_cities(&ctx).await;
    let spec = WalkerSpec::builder::<LoopWalker>("LoopWalker")
        .on_any_node(keep_looping)
        .max_visits(10)
        .record_trail()
        .build();
    let mut run = Traversal::decode(spec, ctx.clone(), &json!({})).unwrap();
    walkabout_graph::with_context(ctx, run.run(a.id.clone())).await.unwrap();
    let response = run.into_response();
    let errors = response["errors"].as_array().unwrap();
    assert_eq!(errors[0]["error_code"], json!("walker_limit_exceeded"));
    assert_eq!(response["trail"].as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn depth_cap_terminates() {
    let ctx = memory_context();
    let (a, _b) = two_cities(&ctx).await;
    let spec = WalkerSpec::builder::<LoopWalker>("LoopWalker")
        .on_any_node(keep_looping)
        .max_depth(3)
        .build();
    let mut run = Traversal::decode(spec, ctx.clone(), &json!({})).unwrap();
    walkabout_graph::with_context(ctx, run.run(a.id.clone())).await.unwrap();
    let errors = run.response()["errors"].as_array().unwrap();
    assert_eq!(errors[0]["error_code"], json!("walker_limit_exceeded"));
}

#[tokio::test]
async fn acyclic_walker_visits_each_entity_once() {
    let ctx = memory_context();
    let (a, _b) = two_cities(&ctx).await;
    let spec = WalkerSpec::builder::<LoopWalker>("LoopWalker")
        .on_any_node(keep_looping)
        .acyclic()
        .record_trail()
        .max_visits(100)
        .build();
    let mut run = Traversal::decode(spec, ctx.clone(), &json!({})).unwrap();
    walkabout_graph::with_context(ctx, run.run(a.id.clone())).await.unwrap();
    let response = run.into_response();
    assert!(response.get("errors").is_none());
    // Two cities and one edge, each visited exactly once.
    assert_eq!(response["trail"].as_array().unwrap().len(), 3);
}

#[derive(Deserialize, Default)]
struct QueueProbe {
    #[serde(default)]
    snapshots: Vec<Vec<String>>,
}

fn probe<'a>(w: &'a mut QueueProbe, v: &'a mut Visit<'_>) -> HookFuture<'a> {
    Box::pin(async move {
        if w.snapshots.is_empty() {
            let extra: Vec<EntityId> = ["n:Stop:1", "n:Stop:2", "n:Stop:3"]
                .iter()
                .map(|s| EntityId::parse(s).unwrap())
                .collect();
            v.append(extra[..2].to_vec());
            v.prepend(vec![extra[2].clone()]);
            v.insert_after(&extra[0], vec![EntityId::parse("n:Stop:4").unwrap()])
                .map_err(walkabout_engine::HookError::from)?;
            assert!(v.is_queued(&extra[1]));
            let removed = v.dequeue(&[extra[1].clone()]);
            assert_eq!(removed.len(), 1);
            assert!(!v.is_queued(&extra[1]));
        }
        w.snapshots
            .push(v.get_queue().iter().map(|id| id.as_str().to_string()).collect());
        Ok(Outcome::Continue)
    })
}

#[tokio::test]
async fn queue_laws_hold_under_mutation() {
    let ctx = memory_context();
    let start = walkabout_graph::with_context(ctx.clone(), async {
        Node::create("Stop", Map::new()).await.unwrap()
    })
    .await;
    let spec = WalkerSpec::builder::<QueueProbe>("QueueProbe")
        .on_any_node(probe)
        .build();
    let mut run = Traversal::decode(spec, ctx.clone(), &json!({})).unwrap();
    walkabout_graph::with_context(ctx, run.run(start.id.clone())).await.unwrap();
    let probe_state: &QueueProbe = run.walker_ref().unwrap();
    // prepend lands at the head, append at the tail, insert_after after its
    // anchor, and the dequeued entry is gone.
    assert_eq!(
        probe_state.snapshots[0],
        vec!["n:Stop:3", "n:Stop:1", "n:Stop:4"]
    );
}

#[derive(Deserialize, Default)]
struct Skipper {
    #[serde(default)]
    first_hook_visits: u32,
    #[serde(default)]
    second_hook_visits: u32,
}

fn skip_first<'a>(w: &'a mut Skipper, v: &'a mut Visit<'_>) -> HookFuture<'a> {
    Box::pin(async move {
        w.first_hook_visits += 1;
        v.skip();
        Ok(Outcome::Continue)
    })
}

fn never_reached<'a>(w: &'a mut Skipper, _v: &'a mut Visit<'_>) -> HookFuture<'a> {
    Box::pin(async move {
        w.second_hook_visits += 1;
        Ok(Outcome::Continue)
    })
}

#[tokio::test]
async fn skip_aborts_remaining_hooks_for_current_entity_only() {
    let ctx = memory_context();
    let (start, extra) = walkabout_graph::with_context(ctx.clone(), async {
        (
            Node::create("Stop", Map::new()).await.unwrap(),
            Node::create("Stop", Map::new()).await.unwrap(),
        )
    })
    .await;
    let spec = WalkerSpec::builder::<Skipper>("Skipper")
        .on_any_node(skip_first)
        .on_any_node(never_reached)
        .build();
    let mut run = Traversal::decode(spec, ctx.clone(), &json!({})).unwrap();
    run.queue_mut().append([extra.id.clone()], 0);
    walkabout_graph::with_context(ctx, run.run(start.id.clone())).await.unwrap();
    let walker: &Skipper = run.walker_ref().unwrap();
    // Both entities processed; the second hook never fired.
    assert_eq!(walker.first_hook_visits, 2);
    assert_eq!(walker.second_hook_visits, 0);
}

#[derive(Deserialize, Default)]
struct Quitter {}

fn quit<'a>(_w: &'a mut Quitter, v: &'a mut Visit<'_>) -> HookFuture<'a> {
    Box::pin(async move {
        v.report(json!("visited"));
        Ok(Outcome::Disengage)
    })
}

fn record_exit<'a>(_w: &'a mut Quitter, v: &'a mut Visit<'_>) -> HookFuture<'a> {
    Box::pin(async move {
        let cancelled = v.cancelled();
        v.response_mut()
            .insert("exited".into(), json!({"cancelled": cancelled}));
        Ok(Outcome::Continue)
    })
}

#[tokio::test]
async fn disengage_is_terminal_but_on_exit_runs() {
    let ctx = memory_context();
    let (start, extra) = walkabout_graph::with_context(ctx.clone(), async {
        (
            Node::create("Stop", Map::new()).await.unwrap(),
            Node::create("Stop", Map::new()).await.unwrap(),
        )
    })
    .await;
    let spec = WalkerSpec::builder::<Quitter>("Quitter")
        .on_any_node(quit)
        .on_exit(record_exit)
        .build();
    let mut run = Traversal::decode(spec, ctx.clone(), &json!({})).unwrap();
    run.queue_mut().append([extra.id.clone()], 0);
    walkabout_graph::with_context(ctx, run.run(start.id.clone())).await.unwrap();
    assert_eq!(run.state(), WalkerState::Disengaged);
    // The second entity was never drained.
    assert_eq!(run.queue().len(), 1);
    let response = run.into_response();
    assert_eq!(response["reports"], json!(["visited"]));
    assert_eq!(response["exited"], json!({"cancelled": false}));
}

#[derive(Deserialize, Default)]
struct OrderProbe {
    #[serde(default)]
    log: Vec<String>,
}

fn log_entity_any<'a>(w: &'a mut OrderProbe, _v: &'a mut Visit<'_>) -> HookFuture<'a> {
    Box::pin(async move {
        w.log.push("entity:any".into());
        Ok(Outcome::Continue)
    })
}

fn log_entity_exact<'a>(w: &'a mut OrderProbe, _v: &'a mut Visit<'_>) -> HookFuture<'a> {
    Box::pin(async move {
        w.log.push("entity:exact".into());
        Ok(Outcome::Continue)
    })
}

fn log_walker_any<'a>(w: &'a mut OrderProbe, _v: &'a mut Visit<'_>) -> HookFuture<'a> {
    Box::pin(async move {
        w.log.push("walker:any".into());
        Ok(Outcome::Continue)
    })
}

fn log_walker_exact<'a>(w: &'a mut OrderProbe, _v: &'a mut Visit<'_>) -> HookFuture<'a> {
    Box::pin(async move {
        w.log.push("walker:exact".into());
        Ok(Outcome::Continue)
    })
}

#[tokio::test]
async fn hook_resolution_order_is_entity_side_then_walker_side_by_specificity() {
    let ctx = memory_context();
    let start = walkabout_graph::with_context(ctx.clone(), async {
        Node::create("City", Map::new()).await.unwrap()
    })
    .await;
    let hooks = Arc::new(EntityHooks::new());
    hooks.on_node_visit::<OrderProbe>("City", Target::Any, log_entity_any);
    hooks.on_node_visit::<OrderProbe>("City", Target::kind("OrderProbe"), log_entity_exact);
    let spec = WalkerSpec::builder::<OrderProbe>("OrderProbe")
        .on_any_node(log_walker_any)
        .on_node_kind("City", log_walker_exact)
        .build();
    let mut run = Traversal::decode(spec, ctx.clone(), &json!({}))
        .unwrap()
        .with_entity_hooks(hooks);
    walkabout_graph::with_context(ctx, run.run(start.id.clone())).await.unwrap();
    let walker: &OrderProbe = run.walker_ref().unwrap();
    assert_eq!(
        walker.log,
        vec!["entity:exact", "entity:any", "walker:exact", "walker:any"]
    );
}

#[tokio::test]
async fn traversal_is_deterministic_across_runs() {
    let ctx = memory_context();
    let (a, _b) = two_cities(&ctx).await;
    let mut responses = Vec::new();
    for _ in 0..2 {
        let spec = WalkerSpec::builder::<Sightseer>("Sightseer")
            .on_node_kind("City", sightsee)
            .record_trail()
            .build();
        let mut run = Traversal::decode(spec, ctx.clone(), &json!({})).unwrap();
        walkabout_graph::with_context(ctx.clone(), run.run(a.id.clone()))
            .await
            .unwrap();
        responses.push(run.into_response());
    }
    assert_eq!(responses[0], responses[1]);
}

#[derive(Deserialize, Default)]
struct Canceller {}

fn slow_hook<'a>(_w: &'a mut Canceller, v: &'a mut Visit<'_>) -> HookFuture<'a> {
    Box::pin(async move {
        v.report(json!("step"));
        Ok(Outcome::Continue)
    })
}

fn note_cancel<'a>(_w: &'a mut Canceller, v: &'a mut Visit<'_>) -> HookFuture<'a> {
    Box::pin(async move {
        let cancelled = v.cancelled();
        v.response_mut().insert("saw_cancel".into(), json!(cancelled));
        Ok(Outcome::Continue)
    })
}

#[tokio::test]
async fn cancellation_runs_exit_hooks_with_marker() {
    let ctx = memory_context();
    let start = walkabout_graph::with_context(ctx.clone(), async {
        Node::create("Stop", Map::new()).await.unwrap()
    })
    .await;
    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let spec = WalkerSpec::builder::<Canceller>("Canceller")
        .on_any_node(slow_hook)
        .on_exit(note_cancel)
        .build();
    let mut run = Traversal::decode(spec, ctx.clone(), &json!({}))
        .unwrap()
        .with_cancel(token);
    walkabout_graph::with_context(ctx, run.run(start.id.clone())).await.unwrap();
    let response = run.into_response();
    assert_eq!(response["cancelled"], json!(true));
    assert_eq!(response["saw_cancel"], json!(true));
    // No entity was processed after the cancellation point.
    assert_eq!(response["reports"], json!([]));
}
