//! Selector Bridge server: session bookkeeping around the policy script.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod script_loader;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::future::join_all;
use serde_json::json;

use panrpc_core::codec::encode_wire;
use panrpc_core::protocol::envelope::Request;
use panrpc_core::protocol::selector::{session_key, SelectorMsg};
use panrpc_core::{ErrorCode, Path, PathFingerprint, PathInterface, PathMetadata};
use panrpc_daemon::selector::SelectorService;
use panrpc_daemon::AppState;

use script_loader::{call_int, config_with_script, engine_with_script, engine_with_tracker};

const LOCAL: &str = "1-ff00:0:110,10.0.0.1:4433";
const REMOTE: &str = "1-ff00:0:112,10.0.0.2:443";

/// Counts every call; `Path` answers whatever `answer` holds.
const RECORDING_POLICY: &str = r##"
calls = 0
prefs = {}
answer = nil
downed = nil

function panapi.Initialize(p, l, r, paths)
    calls = calls + 1
    prefs = p
    answer = paths[1] and paths[1].Fingerprint
end

function panapi.SetPreferences(p, l, r)
    calls = calls + 1
    prefs = p
end

function panapi.Path(l, r)
    calls = calls + 1
    return answer
end

function panapi.PathDown(l, r, fp, intf)
    calls = calls + 1
    downed = intf.IA .. "#" .. intf.IfID
end

function panapi.Refresh(l, r, paths)
    calls = calls + 1
    answer = paths[#paths] and paths[#paths].Fingerprint
end

function panapi.Close(l, r)
    calls = calls + 1
end

function panapi.Calls() return calls end
function panapi.Profile() return prefs.profile end
function panapi.Downed() return downed end
function panapi.Answer(fp) answer = fp end
"##;

fn path(fp: &str) -> Path {
    Path::new(
        "1-ff00:0:110",
        "1-ff00:0:112",
        fp,
        SystemTime::now() + Duration::from_secs(3600),
    )
}

fn path_with_latency(fp: &str, millis: &[u64]) -> Path {
    path(fp).with_metadata(PathMetadata {
        latency: millis.iter().map(|m| Duration::from_millis(*m)).collect(),
        ..PathMetadata::default()
    })
}

fn init_msg(fps: &[&str], prefs: &[(&str, &str)]) -> SelectorMsg {
    SelectorMsg {
        preferences: Some(
            prefs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        paths: Some(fps.iter().map(|fp| encode_wire(&path(fp))).collect()),
        ..SelectorMsg::for_pair(LOCAL, REMOTE)
    }
}

fn pair() -> SelectorMsg {
    SelectorMsg::for_pair(LOCAL, REMOTE)
}

#[tokio::test]
async fn initialize_then_path_resolves_through_session() {
    let (_dir, engine) = engine_with_script(RECORDING_POLICY);
    let svc = SelectorService::new(engine.clone());

    svc.initialize(init_msg(&["A", "B"], &[])).await.unwrap();
    let fp = svc.path(pair()).await.unwrap();

    assert_eq!(fp, Some(PathFingerprint::new("A")));
    let key = session_key(LOCAL, REMOTE);
    let resolved = svc.sessions().resolve(&key, &PathFingerprint::new("A")).unwrap();
    assert_eq!(resolved.fingerprint.as_str(), "A");
    assert_eq!(call_int(&engine, "panapi", "Calls"), 2);
}

#[tokio::test]
async fn path_for_unknown_session_skips_script() {
    let (_dir, engine) = engine_with_script(RECORDING_POLICY);
    let svc = SelectorService::new(engine.clone());

    assert_eq!(svc.path(pair()).await.unwrap(), None);
    assert_eq!(call_int(&engine, "panapi", "Calls"), 0);
}

#[tokio::test]
async fn path_down_evicts_even_if_script_keeps_choosing_it() {
    let (_dir, engine) = engine_with_script(RECORDING_POLICY);
    let svc = SelectorService::new(engine.clone());
    svc.initialize(init_msg(&["A", "B"], &[])).await.unwrap();

    svc.path_down(SelectorMsg {
        fingerprint: Some(PathFingerprint::new("A")),
        path_interface: Some(PathInterface::new("1-ff00:0:111", 41)),
        ..pair()
    })
    .await
    .unwrap();

    // The script still answers "A"; the daemon must not hand it out.
    assert_eq!(svc.path(pair()).await.unwrap(), None);
    let key = session_key(LOCAL, REMOTE);
    assert_eq!(svc.sessions().resolve(&key, &PathFingerprint::new("A")), None);
    assert!(svc.sessions().resolve(&key, &PathFingerprint::new("B")).is_some());

    let downed = engine.call_named("panapi", "Downed", vec![]).unwrap();
    assert_eq!(downed[0].as_str(), Some("1-ff00:0:111#41"));
}

#[tokio::test]
async fn refresh_replaces_candidates() {
    let (_dir, engine) = engine_with_script(RECORDING_POLICY);
    let svc = SelectorService::new(engine.clone());
    svc.initialize(init_msg(&["A"], &[])).await.unwrap();

    svc.refresh(SelectorMsg {
        paths: Some(vec![encode_wire(&path("C")), encode_wire(&path("D"))]),
        ..pair()
    })
    .await
    .unwrap();

    assert_eq!(svc.path(pair()).await.unwrap(), Some(PathFingerprint::new("D")));
    let key = session_key(LOCAL, REMOTE);
    assert!(svc.sessions().resolve(&key, &PathFingerprint::new("A")).is_none());
}

#[tokio::test]
async fn close_is_idempotent_and_calls_script_once() {
    let (_dir, engine) = engine_with_script(RECORDING_POLICY);
    let svc = SelectorService::new(engine.clone());
    svc.initialize(init_msg(&["A"], &[])).await.unwrap();

    svc.close(pair()).await.unwrap();
    svc.close(pair()).await.unwrap();

    assert!(svc.sessions().is_empty());
    // Initialize + one Close.
    assert_eq!(call_int(&engine, "panapi", "Calls"), 2);
    assert_eq!(svc.path(pair()).await.unwrap(), None);
}

#[tokio::test]
async fn missing_fields_are_rejected_before_policy() {
    let (_dir, engine) = engine_with_script(RECORDING_POLICY);
    let svc = SelectorService::new(engine.clone());

    let no_remote = SelectorMsg {
        local: Some(LOCAL.into()),
        ..SelectorMsg::default()
    };
    let err = svc.initialize(no_remote).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingField);
    assert!(err.to_string().contains("remote"));

    svc.initialize(init_msg(&["A"], &[])).await.unwrap();
    let no_intf = SelectorMsg {
        fingerprint: Some(PathFingerprint::new("A")),
        ..pair()
    };
    let err = svc.path_down(no_intf).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingField);

    // Only the successful Initialize reached the script, and nothing was evicted.
    assert_eq!(call_int(&engine, "panapi", "Calls"), 1);
    let key = session_key(LOCAL, REMOTE);
    assert!(svc.sessions().resolve(&key, &PathFingerprint::new("A")).is_some());
}

#[tokio::test]
async fn set_preferences_creates_session_and_reaches_script() {
    let (_dir, engine) = engine_with_script(RECORDING_POLICY);
    let svc = SelectorService::new(engine.clone());

    let mut prefs = BTreeMap::new();
    prefs.insert("profile".to_string(), "low-latency".to_string());
    svc.set_preferences(SelectorMsg {
        preferences: Some(prefs.clone()),
        ..pair()
    })
    .await
    .unwrap();

    let key = session_key(LOCAL, REMOTE);
    assert_eq!(svc.sessions().preferences(&key), Some(prefs));
    let profile = engine.call_named("panapi", "Profile", vec![]).unwrap();
    assert_eq!(profile[0].as_str(), Some("low-latency"));
}

#[tokio::test]
async fn initialize_passes_preferences() {
    let (_dir, engine) = engine_with_script(RECORDING_POLICY);
    let svc = SelectorService::new(engine.clone());

    svc.initialize(init_msg(&["A"], &[("profile", "bulk")]))
        .await
        .unwrap();

    let profile = engine.call_named("panapi", "Profile", vec![]).unwrap();
    assert_eq!(profile[0].as_str(), Some("bulk"));
}

#[tokio::test]
async fn script_errors_surface_as_policy_and_engine_recovers() {
    let (_dir, engine) = engine_with_script(
        r#"
        function panapi.Path() error("boom") end
        function panapi.Ping() return 1 end
        "#,
    );
    let svc = SelectorService::new(engine.clone());
    svc.initialize(init_msg(&["A"], &[])).await.unwrap();

    let err = svc.path(pair()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Policy);
    assert_eq!(call_int(&engine, "panapi", "Ping"), 1);
}

#[tokio::test]
async fn path_table_result_is_accepted() {
    let (_dir, engine) = engine_with_script(
        r#"
        chosen = nil
        function panapi.Initialize(p, l, r, paths) chosen = paths[2] end
        function panapi.Path() return chosen end
        "#,
    );
    let svc = SelectorService::new(engine);
    svc.initialize(init_msg(&["A", "B"], &[])).await.unwrap();

    assert_eq!(svc.path(pair()).await.unwrap(), Some(PathFingerprint::new("B")));
}

#[tokio::test]
async fn unusable_path_result_is_a_policy_error() {
    let (_dir, engine) = engine_with_script("function panapi.Path() return 42 end");
    let svc = SelectorService::new(engine);
    svc.initialize(init_msg(&["A"], &[])).await.unwrap();

    let err = svc.path(pair()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Policy);
}

#[tokio::test]
async fn empty_script_answers_no_path() {
    let (_dir, engine, tracker) = engine_with_tracker("");
    let svc = SelectorService::new(engine);

    for _ in 0..3 {
        svc.initialize(init_msg(&["A"], &[])).await.unwrap();
        assert_eq!(svc.path(pair()).await.unwrap(), None);
    }
    svc.close(pair()).await.unwrap();

    assert_eq!(tracker.count(), 3);
    assert!(tracker.contains("panapi", "Initialize"));
    assert!(tracker.contains("panapi", "Path"));
    assert!(tracker.contains("panapi", "Close"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_path_calls_never_overlap_in_script() {
    let (_dir, engine) = engine_with_script(
        r#"
        inflight = 0
        maxseen = 0
        function panapi.Initialize() end
        function panapi.Path()
            inflight = inflight + 1
            if inflight > maxseen then maxseen = inflight end
            local t = os.clock()
            while os.clock() - t < 0.002 do end
            inflight = inflight - 1
            return "A"
        end
        function panapi.MaxSeen() return maxseen end
        "#,
    );
    let svc = Arc::new(SelectorService::new(engine.clone()));
    svc.initialize(init_msg(&["A"], &[])).await.unwrap();

    let results = join_all((0..16).map(|_| {
        let svc = Arc::clone(&svc);
        tokio::spawn(async move { svc.path(pair()).await })
    }))
    .await;

    for r in results {
        assert_eq!(r.unwrap().unwrap(), Some(PathFingerprint::new("A")));
    }
    assert_eq!(call_int(&engine, "panapi", "MaxSeen"), 1);
}

#[tokio::test]
async fn dispatcher_routes_selector_requests() {
    let (_dir, cfg) = config_with_script("function panapi.Path() return 'A' end");
    let state = AppState::new(cfg).unwrap();
    let dispatcher = state.dispatcher();

    let init = Request::new(1, "Selector", "Initialize", &init_msg(&["A"], &[])).unwrap();
    assert_eq!(dispatcher.dispatch(&init).await.unwrap(), None);

    let path = Request::new(2, "Selector", "Path", &pair()).unwrap();
    let data = dispatcher.dispatch(&path).await.unwrap().unwrap();
    assert_eq!(data["fingerprint"], json!("A"));

    let bogus = Request::new(3, "Selector", "Teleport", &pair()).unwrap();
    let err = dispatcher.dispatch(&bogus).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownMethod);

    let nosvc = Request::new(4, "Nope", "Path", &pair()).unwrap();
    let err = dispatcher.dispatch(&nosvc).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownMethod);
    assert!(err.to_string().contains("Nope.Path"));
}

#[tokio::test]
async fn shipped_policy_prefers_low_latency_and_avoids_downed_paths() {
    let source =
        std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/policy/default.lua"))
            .unwrap();
    let (_dir, engine) = engine_with_script(&source);
    let svc = SelectorService::new(engine);

    svc.initialize(SelectorMsg {
        paths: Some(vec![
            encode_wire(&path_with_latency("slow", &[40, 30])),
            encode_wire(&path_with_latency("fast", &[10, 20])),
        ]),
        ..pair()
    })
    .await
    .unwrap();
    assert_eq!(svc.path(pair()).await.unwrap(), Some(PathFingerprint::new("fast")));

    svc.path_down(SelectorMsg {
        fingerprint: Some(PathFingerprint::new("fast")),
        path_interface: Some(PathInterface::new("1-ff00:0:111", 2)),
        ..pair()
    })
    .await
    .unwrap();
    assert_eq!(svc.path(pair()).await.unwrap(), Some(PathFingerprint::new("slow")));

    svc.close(pair()).await.unwrap();
    assert_eq!(svc.path(pair()).await.unwrap(), None);
}
