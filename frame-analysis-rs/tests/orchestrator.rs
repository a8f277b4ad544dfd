mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{default_answer, orchestrator, png_image, test_settings, ScriptedClient};
use frame_analysis::{
    AnalysisError, AnalysisSettings, Orchestrator, ReportStatus, TaskKind, TaskResult, Validation,
};
use resilience::{CircuitBreakerConfig, CircuitState, RetryConfig, ServiceError};

#[tokio::test]
async fn one_result_per_requested_task_despite_failures() {
    let client = Arc::new(ScriptedClient::new(|kind, _, _| match kind {
        TaskKind::Vision => Err(ServiceError::permanent("invalid api key")),
        TaskKind::ObjectDetection => Err(ServiceError::transient("connection reset")),
        other => Ok(default_answer(other)),
    }));
    let orchestrator = orchestrator(test_settings(), client);

    let report = orchestrator
        .analyze(&png_image(1), "", &TaskKind::ALL)
        .await
        .unwrap();

    assert_eq!(report.tasks.len(), TaskKind::ALL.len());
    for kind in TaskKind::ALL {
        assert_eq!(report.get(kind).unwrap().task(), kind);
    }
    assert_eq!(report.get(TaskKind::Vision).unwrap().status(), "error");
    assert_eq!(report.get(TaskKind::ObjectDetection).unwrap().status(), "error");
    assert!(report.get(TaskKind::TextExtraction).unwrap().is_success());
    assert!(report.get(TaskKind::Geolocation).unwrap().is_success());
    assert_eq!(report.status, ReportStatus::Partial);
}

#[tokio::test]
async fn duplicate_task_kinds_are_run_once() {
    let client = Arc::new(ScriptedClient::new(|kind, _, _| Ok(default_answer(kind))));
    let orchestrator = orchestrator(test_settings(), client.clone());

    let report = orchestrator
        .analyze(&png_image(1), "", &[TaskKind::Vision, TaskKind::Vision])
        .await
        .unwrap();

    assert_eq!(report.tasks.len(), 1);
    assert_eq!(client.calls(TaskKind::Vision), 1);
    assert_eq!(report.status, ReportStatus::Complete);
}

#[tokio::test]
async fn pending_tasks_are_reported_as_timeout_at_the_request_deadline() {
    let client = Arc::new(
        ScriptedClient::new(|kind, _, _| Ok(default_answer(kind)))
            .with_delay(TaskKind::TextExtraction, Duration::from_secs(30)),
    );
    let settings = AnalysisSettings {
        task_timeout: Duration::from_secs(20),
        request_timeout: Duration::from_millis(150),
        ..test_settings()
    };
    let orchestrator = orchestrator(settings, client);

    let started = std::time::Instant::now();
    let report = orchestrator
        .analyze(&png_image(1), "", &TaskKind::ALL)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(report.get(TaskKind::Vision).unwrap().is_success());
    assert!(report.get(TaskKind::ObjectDetection).unwrap().is_success());
    assert_eq!(report.get(TaskKind::TextExtraction).unwrap().status(), "timeout");
    // Geolocation waits for the first stage, which used up the deadline.
    assert_eq!(report.get(TaskKind::Geolocation).unwrap().status(), "timeout");
}

#[tokio::test]
async fn task_timeout_bounds_a_single_task() {
    let client = Arc::new(
        ScriptedClient::new(|kind, _, _| Ok(default_answer(kind)))
            .with_delay(TaskKind::Vision, Duration::from_secs(30)),
    );
    let settings = AnalysisSettings {
        task_timeout: Duration::from_millis(50),
        ..test_settings()
    };
    let orchestrator = orchestrator(settings, client);

    let report = orchestrator
        .analyze(&png_image(1), "", &[TaskKind::Vision, TaskKind::ObjectDetection])
        .await
        .unwrap();

    match report.get(TaskKind::Vision).unwrap() {
        TaskResult::Timeout(failure) => assert_eq!(failure.error_kind.as_str(), "deadline_exceeded"),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(report.get(TaskKind::ObjectDetection).unwrap().is_success());
}

#[tokio::test]
async fn geolocation_is_enriched_with_first_stage_findings() {
    let client = Arc::new(ScriptedClient::new(|kind, _, _| Ok(default_answer(kind))));
    let orchestrator = orchestrator(test_settings(), client.clone());

    orchestrator
        .analyze(&png_image(1), "Holiday photo", &[TaskKind::Vision, TaskKind::Geolocation])
        .await
        .unwrap();

    let contexts = client.contexts(TaskKind::Geolocation);
    assert_eq!(contexts.len(), 1);
    assert!(contexts[0].starts_with("Holiday photo"));
    assert!(contexts[0].contains("- vision: A narrow street with a tram at dusk."));
    assert_eq!(client.contexts(TaskKind::Vision), vec!["Holiday photo".to_string()]);
}

#[tokio::test]
async fn breaker_short_circuits_after_threshold_failures() {
    let client = Arc::new(ScriptedClient::new(|kind, _, _| match kind {
        TaskKind::Vision => Err(ServiceError::transient("upstream 502")),
        other => Ok(default_answer(other)),
    }));
    let settings = AnalysisSettings {
        cache_enabled: false,
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
        },
        ..test_settings()
    };
    let orchestrator = orchestrator(settings, client.clone());
    let breaker = orchestrator.registry().get(TaskKind::Vision).breaker().unwrap().clone();

    for expected_failures in 1..=2 {
        let report = orchestrator.analyze(&png_image(1), "", &[TaskKind::Vision]).await.unwrap();
        assert_eq!(report.get(TaskKind::Vision).unwrap().status(), "error");
        // Separate requests share one breaker, so failures add up.
        assert_eq!(breaker.failure_count(), expected_failures);
    }

    orchestrator.analyze(&png_image(1), "", &[TaskKind::Vision]).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(client.calls(TaskKind::Vision), 3);

    let report = orchestrator.analyze(&png_image(1), "", &[TaskKind::Vision]).await.unwrap();
    assert_eq!(report.get(TaskKind::Vision).unwrap().status(), "circuit_open");
    assert_eq!(client.calls(TaskKind::Vision), 3);

    // Other task kinds have their own breakers.
    let report = orchestrator.analyze(&png_image(1), "", &[TaskKind::ObjectDetection]).await.unwrap();
    assert!(report.get(TaskKind::ObjectDetection).unwrap().is_success());
}

#[tokio::test]
async fn half_open_probe_decides_next_state() {
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();
    let client = Arc::new(ScriptedClient::new(move |kind, _, _| {
        if flag.load(Ordering::SeqCst) {
            Ok(default_answer(kind))
        } else {
            Err(ServiceError::rate_limited("429"))
        }
    }));
    let settings = AnalysisSettings {
        cache_enabled: false,
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
        },
        ..test_settings()
    };
    let orchestrator = orchestrator(settings, client.clone());
    let breaker = orchestrator.registry().get(TaskKind::Vision).breaker().unwrap().clone();

    orchestrator.analyze(&png_image(1), "", &[TaskKind::Vision]).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    // A failed probe reopens the breaker.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let report = orchestrator.analyze(&png_image(1), "", &[TaskKind::Vision]).await.unwrap();
    assert_eq!(report.get(TaskKind::Vision).unwrap().status(), "error");
    assert_eq!(client.calls(TaskKind::Vision), 2);
    assert_eq!(breaker.state(), CircuitState::Open);

    let report = orchestrator.analyze(&png_image(1), "", &[TaskKind::Vision]).await.unwrap();
    assert_eq!(report.get(TaskKind::Vision).unwrap().status(), "circuit_open");
    assert_eq!(client.calls(TaskKind::Vision), 2);

    // A successful probe closes it.
    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(80)).await;
    let report = orchestrator.analyze(&png_image(1), "", &[TaskKind::Vision]).await.unwrap();
    assert!(report.get(TaskKind::Vision).unwrap().is_success());
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(client.calls(TaskKind::Vision), 3);
}

#[tokio::test]
async fn retryable_failures_are_invisible_when_a_retry_succeeds() {
    let client = Arc::new(ScriptedClient::new(|kind, _, call| {
        if call <= 2 {
            Err(ServiceError::rate_limited("429"))
        } else {
            Ok(default_answer(kind))
        }
    }));
    let settings = AnalysisSettings {
        retry: RetryConfig {
            max_attempts: 3,
            ..test_settings().retry
        },
        ..test_settings()
    };
    let orchestrator = orchestrator(settings, client.clone());

    let report = orchestrator.analyze(&png_image(1), "", &[TaskKind::Vision]).await.unwrap();
    let success = report.get(TaskKind::Vision).unwrap().success().unwrap();
    assert_eq!(success.validation, Validation::Passed);
    assert_eq!(client.calls(TaskKind::Vision), 3);
}

#[tokio::test]
async fn persistent_retryable_failure_uses_exactly_max_attempts() {
    let client = Arc::new(ScriptedClient::new(|_, _, _| Err(ServiceError::timeout("upstream timeout"))));
    let settings = AnalysisSettings {
        retry: RetryConfig {
            max_attempts: 4,
            ..test_settings().retry
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(60),
        },
        ..test_settings()
    };
    let orchestrator = orchestrator(settings, client.clone());

    let report = orchestrator.analyze(&png_image(1), "", &[TaskKind::Vision]).await.unwrap();
    assert_eq!(report.get(TaskKind::Vision).unwrap().status(), "timeout");
    assert_eq!(client.calls(TaskKind::Vision), 4);
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let client = Arc::new(ScriptedClient::new(|_, _, _| Err(ServiceError::permanent("bad request"))));
    let settings = AnalysisSettings {
        retry: RetryConfig {
            max_attempts: 5,
            ..test_settings().retry
        },
        ..test_settings()
    };
    let orchestrator = orchestrator(settings, client.clone());

    orchestrator.analyze(&png_image(1), "", &[TaskKind::Vision]).await.unwrap();
    assert_eq!(client.calls(TaskKind::Vision), 1);
}

#[tokio::test]
async fn cached_results_skip_the_service_and_are_byte_identical() {
    let client = Arc::new(ScriptedClient::new(|kind, _, _| Ok(default_answer(kind))));
    let orchestrator = orchestrator(test_settings(), client.clone());

    let first = orchestrator
        .analyze(&png_image(1), "street scene", &TaskKind::ALL)
        .await
        .unwrap();
    let second = orchestrator
        .analyze(&png_image(1), "street scene", &TaskKind::ALL)
        .await
        .unwrap();

    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    for kind in TaskKind::ALL {
        assert_eq!(client.calls(kind), 1, "{} should be served from cache", kind);
    }

    let stats = orchestrator.cache_stats().unwrap();
    assert_eq!(stats.entries, 4);
    assert_eq!(stats.hits, 4);
}

#[tokio::test]
async fn cache_key_covers_context_and_image() {
    let client = Arc::new(ScriptedClient::new(|kind, _, _| Ok(default_answer(kind))));
    let orchestrator = orchestrator(test_settings(), client.clone());

    orchestrator.analyze(&png_image(1), "question A", &[TaskKind::Vision]).await.unwrap();
    orchestrator.analyze(&png_image(1), "question B", &[TaskKind::Vision]).await.unwrap();
    orchestrator.analyze(&png_image(2), "question A", &[TaskKind::Vision]).await.unwrap();
    orchestrator
        .analyze(&format!("data:image/png;base64,{}", png_image(1)), "question A", &[TaskKind::Vision])
        .await
        .unwrap();

    assert_eq!(client.calls(TaskKind::Vision), 3);
}

#[tokio::test]
async fn cache_evicts_least_recently_used_entry() {
    let client = Arc::new(ScriptedClient::new(|kind, _, _| Ok(default_answer(kind))));
    let settings = AnalysisSettings {
        cache_max_entries: 2,
        ..test_settings()
    };
    let orchestrator = orchestrator(settings, client.clone());
    let vision = [TaskKind::Vision];

    orchestrator.analyze(&png_image(1), "", &vision).await.unwrap();
    orchestrator.analyze(&png_image(2), "", &vision).await.unwrap();
    // Touch image 1 so image 2 becomes the least recently used.
    orchestrator.analyze(&png_image(1), "", &vision).await.unwrap();
    orchestrator.analyze(&png_image(3), "", &vision).await.unwrap();
    assert_eq!(client.calls(TaskKind::Vision), 3);

    orchestrator.analyze(&png_image(1), "", &vision).await.unwrap();
    assert_eq!(client.calls(TaskKind::Vision), 3);

    orchestrator.analyze(&png_image(2), "", &vision).await.unwrap();
    assert_eq!(client.calls(TaskKind::Vision), 4);
    assert_eq!(orchestrator.cache_stats().unwrap().entries, 2);
}

#[tokio::test]
async fn cache_can_be_disabled() {
    let client = Arc::new(ScriptedClient::new(|kind, _, _| Ok(default_answer(kind))));
    let settings = AnalysisSettings {
        cache_enabled: false,
        ..test_settings()
    };
    let orchestrator = orchestrator(settings, client.clone());

    orchestrator.analyze(&png_image(1), "", &[TaskKind::Vision]).await.unwrap();
    orchestrator.analyze(&png_image(1), "", &[TaskKind::Vision]).await.unwrap();

    assert_eq!(client.calls(TaskKind::Vision), 2);
    assert!(orchestrator.cache_stats().is_none());
}

#[tokio::test]
async fn malformed_answers_degrade_without_failing_the_report() {
    let client = Arc::new(ScriptedClient::new(|kind, _, _| match kind {
        TaskKind::Geolocation => Ok(r#"{"location": "somewhere"}"#.to_string()),
        other => Ok(default_answer(other)),
    }));
    let orchestrator = orchestrator(test_settings(), client.clone());

    let report = orchestrator
        .analyze(&png_image(1), "", &[TaskKind::Vision, TaskKind::Geolocation])
        .await
        .unwrap();

    let geo = report.get(TaskKind::Geolocation).unwrap().success().unwrap();
    assert!(matches!(geo.validation, Validation::Failed { .. }));
    assert_eq!(geo.narrative, r#"{"location": "somewhere"}"#);
    assert_eq!(report.status, ReportStatus::Complete);
    assert!(report.narrative.contains("validation failed"));

    // Degraded answers are cached like any other success.
    let again = orchestrator
        .analyze(&png_image(1), "", &[TaskKind::Vision, TaskKind::Geolocation])
        .await
        .unwrap();
    assert_eq!(again.to_json().unwrap(), report.to_json().unwrap());
    assert_eq!(client.calls(TaskKind::Geolocation), 1);
    assert_eq!(client.calls(TaskKind::Vision), 1);
}

#[tokio::test]
async fn repeated_request_after_degraded_answer_is_identical() {
    // The service would answer properly the second time, but the first
    // (empty) answer is what the cache hands back.
    let client = Arc::new(ScriptedClient::new(|_, _, call_number| {
        if call_number == 1 {
            Ok(String::new())
        } else {
            Ok("A quiet street.".to_string())
        }
    }));
    let orchestrator = orchestrator(test_settings(), client.clone());

    let first = orchestrator.analyze(&png_image(3), "ctx", &[TaskKind::Vision]).await.unwrap();
    let second = orchestrator.analyze(&png_image(3), "ctx", &[TaskKind::Vision]).await.unwrap();

    let vision = first.get(TaskKind::Vision).unwrap().success().unwrap();
    assert!(matches!(vision.validation, Validation::Failed { .. }));
    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    assert_eq!(client.calls(TaskKind::Vision), 1);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_any_call() {
    let client = Arc::new(ScriptedClient::new(|kind, _, _| Ok(default_answer(kind))));
    let orchestrator = orchestrator(test_settings(), client.clone());

    let err = orchestrator.analyze("not an image", "", &TaskKind::ALL).await.unwrap_err();
    assert!(matches!(err, AnalysisError::Validation(_)));

    let err = orchestrator.analyze(&png_image(1), "", &[]).await.unwrap_err();
    assert!(matches!(err, AnalysisError::Validation(_)));

    assert_eq!(client.total_calls(), 0);
}

#[test]
fn unrepresentable_durations_are_rejected_as_configuration() {
    let client = Arc::new(ScriptedClient::new(|kind, _, _| Ok(default_answer(kind))));

    let oversized = [
        AnalysisSettings {
            cache_ttl: Duration::MAX,
            ..test_settings()
        },
        AnalysisSettings {
            request_timeout: Duration::MAX,
            ..test_settings()
        },
        AnalysisSettings {
            task_timeout: Duration::from_secs(u64::MAX),
            ..test_settings()
        },
    ];

    for settings in oversized {
        let result = Orchestrator::new(settings, client.clone());
        assert!(matches!(result, Err(AnalysisError::Configuration(_))));
    }
}

#[tokio::test]
async fn task_stats_track_outcomes() {
    let client = Arc::new(ScriptedClient::new(|kind, _, _| match kind {
        TaskKind::Vision => Err(ServiceError::permanent("nope")),
        other => Ok(default_answer(other)),
    }));
    let orchestrator = orchestrator(test_settings(), client);

    orchestrator
        .analyze(&png_image(1), "", &[TaskKind::Vision, TaskKind::ObjectDetection])
        .await
        .unwrap();

    let stats = orchestrator.task_stats();
    assert_eq!(stats["vision"].count("error"), 1);
    assert_eq!(stats["object-detection"].count("success"), 1);
}
