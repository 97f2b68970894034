//! Black-box replays of the literal scenarios against the public `Faultline`
//! API, as distinct from the synchronous, timestamp-driven unit tests that
//! live alongside `Engine` itself. These exercise the real Handler mailbox
//! and real `tokio::time` timers end to end.

use std::sync::Arc;
use std::time::Duration;

use faultline::{compiler, AlarmId, AlarmState, Expr, Faultline, Level, Pattern, Style};

fn runtime() -> Faultline {
    Faultline::spawn_default()
}

async fn install(runtime: &Faultline, derived: &AlarmId, expr: Expr) {
    let compiled = compiler::compile(derived, &expr, Style::Atom, Level::default_leaf()).unwrap();
    runtime.add_managed_alarm(derived.clone(), compiled).await.unwrap();
}

#[tokio::test]
async fn debounce_absorbs_a_transient_input() {
    let runtime = runtime();
    let derived = AlarmId::atom("derived");
    install(&runtime, &derived, Expr::debounce(Expr::id("A"), 100)).await;

    runtime.set_alarm(AlarmId::atom("A"), None).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(runtime.alarm_state(&derived), AlarmState::Clear);

    runtime.clear_alarm(AlarmId::atom("A")).await;
    // the absorbed debounce timer must not fire later and flip the derived alarm.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(runtime.alarm_state(&derived), AlarmState::Clear);
}

#[tokio::test]
async fn debounce_passes_a_sustained_input() {
    let runtime = runtime();
    let derived = AlarmId::atom("derived");
    let mut rx = runtime.subscribe(Pattern::atom("derived"));
    install(&runtime, &derived, Expr::debounce(Expr::id("A"), 100)).await;

    runtime.set_alarm(AlarmId::atom("A"), None).await;
    assert_eq!(runtime.alarm_state(&derived), AlarmState::Clear);

    let event = tokio::time::timeout(Duration::from_millis(300), rx.recv())
        .await
        .expect("derived alarm must emit Set once the debounce elapses")
        .unwrap();
    assert_eq!(event.state, AlarmState::Set);
    assert_eq!(runtime.alarm_state(&derived), AlarmState::Set);
}

#[tokio::test]
async fn intensity_triggers_on_the_third_flap_then_clears() {
    let runtime = runtime();
    let derived = AlarmId::atom("derived");
    install(&runtime, &derived, Expr::intensity(Expr::id("A"), 3, 250)).await;

    let a = AlarmId::atom("A");
    runtime.set_alarm(a.clone(), None).await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    runtime.clear_alarm(a.clone()).await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    runtime.set_alarm(a.clone(), None).await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    runtime.clear_alarm(a.clone()).await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    runtime.set_alarm(a.clone(), None).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(runtime.alarm_state(&derived), AlarmState::Set, "third flap within the window must flip Set");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(runtime.alarm_state(&derived), AlarmState::Clear, "window must age out the flaps and clear");
}

#[tokio::test]
async fn sustain_window_requires_continuous_set_time() {
    let runtime = runtime();
    let derived = AlarmId::atom("derived");
    install(&runtime, &derived, Expr::sustain_window(Expr::id("A"), 100, 200)).await;

    let a = AlarmId::atom("A");
    runtime.set_alarm(a.clone(), None).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    runtime.clear_alarm(a.clone()).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    runtime.set_alarm(a.clone(), None).await;

    // only ~10ms of contiguous Set time so far; must still be Clear.
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(runtime.alarm_state(&derived), AlarmState::Clear);

    // once 100ms of uninterrupted Set time accumulates, it must flip.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runtime.alarm_state(&derived), AlarmState::Set);
}

#[tokio::test]
async fn hold_enforces_a_minimum_set_duration() {
    let runtime = runtime();
    let derived = AlarmId::atom("derived");
    install(&runtime, &derived, Expr::hold(Expr::id("A"), 250)).await;

    let a = AlarmId::atom("A");
    runtime.set_alarm(a.clone(), None).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(runtime.alarm_state(&derived), AlarmState::Set);

    runtime.clear_alarm(a.clone()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    // hold ignores the early clear and keeps the derived alarm Set.
    assert_eq!(runtime.alarm_state(&derived), AlarmState::Set);

    tokio::time::sleep(Duration::from_millis(260)).await;
    assert_eq!(runtime.alarm_state(&derived), AlarmState::Clear);
}

#[tokio::test]
async fn compound_expression_tracks_all_of_its_inputs() {
    // (A and B) or not (B and C)
    let runtime = runtime();
    let derived = AlarmId::atom("derived");
    let expr = Expr::or(vec![
        Expr::and(vec![Expr::id("A"), Expr::id("B")]),
        Expr::not(Expr::and(vec![Expr::id("B"), Expr::id("C")])),
    ]);
    install(&runtime, &derived, expr).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    // all inputs unobserved/Clear: not(B and C) = not(Clear) = Set.
    assert_eq!(runtime.alarm_state(&derived), AlarmState::Set);

    runtime.set_alarm(AlarmId::atom("B"), None).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    runtime.set_alarm(AlarmId::atom("C"), None).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    // B and C now Set, so not(...) is Clear; A and B is still Clear (A unset).
    assert_eq!(runtime.alarm_state(&derived), AlarmState::Clear);
}

#[tokio::test]
async fn unknown_as_set_starts_set_for_an_unobserved_input() {
    let runtime = runtime();
    let derived = AlarmId::atom("derived");
    install(&runtime, &derived, Expr::unknown_as_set(Expr::id("X"))).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(runtime.alarm_state(&derived), AlarmState::Set);

    runtime.clear_alarm(AlarmId::atom("X")).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(runtime.alarm_state(&derived), AlarmState::Clear);
}

#[tokio::test]
async fn remedy_callback_runs_once_per_set_edge() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use faultline::RemedySpec;

    let runtime = runtime();
    let id = AlarmId::atom("pump_failure");
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_for_callback = counter.clone();
    runtime
        .add_remedy(
            id.clone(),
            RemedySpec::new(Arc::new(move |_id| {
                let counter = counter_for_callback.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })),
        )
        .await;

    runtime.set_alarm(id.clone(), Some("overpressure".into())).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    runtime.remove_remedy(id.clone()).await;
    runtime.clear_alarm(id.clone()).await;
    runtime.set_alarm(id, Some("overpressure again".into())).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1, "removed remedy must not fire again");
}
