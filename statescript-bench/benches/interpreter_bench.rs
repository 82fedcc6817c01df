//! Interpreter benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};
use statescript_core::{
    ActionBag, Condition, Interpreter, Session, StateMachineDefinition, TimerRegistry,
};

fn create_definition() -> StateMachineDefinition {
    StateMachineDefinition::from_json(&json!({
        "Context": {"Hp": 100, "Gold": 0, "Inventory": [], "Flags": {"boss": false}},
        "Constants": {"Heal": 5, "Price": 3},
        "States": {
            "Exploring": {
                "Hit": [
                    {"Condition": {"$le": ["Hp", 10]}, "Actions": {"$set": ["Hp", 0]}, "Transition": "Dead"},
                    {"Actions": {"$dec": ["Hp", 10]}}
                ],
                "Loot": {"Actions": [{"$inc": ["Gold", 7]}, {"$push": ["Inventory", "gem"]}]},
                "Rest": {"Condition": {"$lt": ["Hp", 100]}, "Actions": {"$inc": ["Hp", "#Heal"]}},
                "$timer": {"Condition": {"$after": 30}, "Transition": "Tired"}
            },
            "Tired": {"-": {"Transition": "Exploring"}},
            "Dead": {"Revive": {"Actions": {"$reset": ["Hp", "Inventory"]}, "Transition": "Exploring"}}
        }
    }))
    .unwrap()
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");
    let interp = Interpreter::new();
    let constants = json!({"Limit": 50});

    let simple = Condition::decode(&json!({"$gt": ["Hp", "#Limit"]})).unwrap();
    let nested = Condition::decode(&json!({"$and": [
        {"$gt": ["Hp", 0]},
        {"$or": [{"$eq": ["Class", "mage"]}, {"$not": "Flags.cursed"}]},
        {"$contains": ["Name", "the"]}
    ]}))
    .unwrap();
    let ctx = json!({"Hp": 80, "Class": "rogue", "Flags": {"cursed": false}, "Name": "Ada the Bold"});

    group.bench_function("comparison", |b| {
        let mut timers = TimerRegistry::new();
        b.iter(|| {
            black_box(
                interp
                    .evaluate(&simple, &ctx, &constants, &mut timers, None, "c")
                    .unwrap(),
            )
        });
    });

    group.bench_function("nested", |b| {
        let mut timers = TimerRegistry::new();
        b.iter(|| {
            black_box(
                interp
                    .evaluate(&nested, &ctx, &constants, &mut timers, None, "c")
                    .unwrap(),
            )
        });
    });

    group.finish();
}

fn bench_array_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_ops");
    let interp = Interpreter::new();
    let constants = json!({});
    let condition = Condition::decode(&json!({"$all": ["Items", {"$ge": ["@.qty", 0]}]})).unwrap();

    for size in [10, 100, 1000].iter() {
        let items: Vec<Value> = (0..*size).map(|i| json!({"id": i, "qty": i % 7})).collect();
        let ctx = json!({ "Items": items });

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("all", size), &ctx, |b, ctx| {
            let mut timers = TimerRegistry::new();
            b.iter(|| {
                black_box(
                    interp
                        .evaluate(&condition, ctx, &constants, &mut timers, None, "c")
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

fn bench_actions(c: &mut Criterion) {
    let mut group = c.benchmark_group("actions");
    let interp = Interpreter::new();
    let constants = json!({"Bonus": 2});
    let bags = ActionBag::decode_list(&json!([
        {"$inc": ["Gold", "#Bonus"], "$mul": ["Gold", 2]},
        {"$pushunique": ["Tags", "seen"], "$set": ["Last", "Gold"]}
    ]));

    group.bench_function("apply", |b| {
        let base = json!({"Gold": 1, "Tags": ["new"]});
        b.iter(|| {
            let mut ctx = base.clone();
            interp
                .apply_actions(&bags, &mut ctx, &constants, None, "Actions")
                .unwrap();
            black_box(ctx)
        });
    });

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let interp = Interpreter::new();
    let def = create_definition();

    group.bench_function("load_definition", |b| {
        let raw = def.to_json().unwrap();
        b.iter(|| black_box(StateMachineDefinition::from_json(&raw).unwrap()));
    });

    group.bench_function("hit_and_rest", |b| {
        b.iter(|| {
            let mut session = Session::new(&def);
            session.dispatch(&interp, &def, "Hit", None).unwrap();
            session.dispatch(&interp, &def, "Rest", None).unwrap();
            black_box(session)
        });
    });

    group.bench_function("timer_tick", |b| {
        let mut ts = 0.0;
        b.iter(|| {
            let mut session = Session::new(&def);
            ts += 1.0;
            session.tick(&interp, &def, ts).unwrap();
            black_box(session.tick(&interp, &def, ts + 30.0).unwrap())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_evaluate,
    bench_array_ops,
    bench_actions,
    bench_dispatch
);
criterion_main!(benches);
