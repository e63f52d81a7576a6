//! Artifact protocol: creation across storage types, immutability rules,
//! and retrieval.

mod common;

use chrono::{Duration, Utc};
use common::{task_def, test_system};
use taskqueue_core::artifacts::{
    ArtifactDownload, CreateArtifactRequest, CreateArtifactResponse, UploadRequest,
};
use taskqueue_core::constants::exchanges;
use taskqueue_core::error::QueueError;
use taskqueue_core::models::generate_task_id;
use taskqueue_core::orchestration::QueueSystem;
use taskqueue_core::scopes::{AllowAll, StaticScopeChecker};
use taskqueue_core::state_machine::ReasonResolved;

async fn running_task(system: &QueueSystem) -> String {
    let task_id = generate_task_id();
    system.create_task(&task_id, task_def()).await.unwrap();
    system.claim_task(&task_id, 0, "wg", "w1").await.unwrap();
    task_id
}

fn s3_request() -> CreateArtifactRequest {
    CreateArtifactRequest {
        content_type: "text/plain".to_string(),
        expires: Utc::now() + Duration::hours(2),
        upload: UploadRequest::S3,
    }
}

#[tokio::test]
async fn test_create_s3_artifact_returns_put_url() {
    let system = test_system();
    let task_id = running_task(&system).await;

    let response = system
        .create_artifact(&task_id, 0, "public/build/log.txt", s3_request())
        .await
        .unwrap();
    match response {
        CreateArtifactResponse::S3 { put_url, content_type, .. } => {
            assert!(put_url.contains("public/build/log.txt"));
            assert_eq!(content_type, "text/plain");
        }
        other => panic!("expected s3 response, got {other:?}"),
    }

    let download = system
        .get_artifact(&task_id, 0, "public/build/log.txt", &AllowAll)
        .await
        .unwrap();
    assert!(matches!(download, ArtifactDownload::Redirect { .. }));
}

#[tokio::test]
async fn test_recreate_identical_is_idempotent() {
    let system = test_system();
    let task_id = running_task(&system).await;
    let request = s3_request();

    system
        .create_artifact(&task_id, 0, "public/out.txt", request.clone())
        .await
        .unwrap();
    // Same body again: succeeds, e.g. to refresh a signed url
    system
        .create_artifact(&task_id, 0, "public/out.txt", request.clone())
        .await
        .unwrap();

    // Different content type: immutability violation
    let mut different = request;
    different.content_type = "application/octet-stream".to_string();
    let err = system
        .create_artifact(&task_id, 0, "public/out.txt", different)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Conflict(_)));
}

#[tokio::test]
async fn test_expiry_may_only_move_later() {
    let system = test_system();
    let task_id = running_task(&system).await;
    let request = s3_request();

    system
        .create_artifact(&task_id, 0, "public/out.txt", request.clone())
        .await
        .unwrap();

    let mut earlier = request.clone();
    earlier.expires = request.expires - Duration::hours(1);
    let err = system
        .create_artifact(&task_id, 0, "public/out.txt", earlier)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Conflict(_)));

    let mut later = request;
    later.expires = later.expires + Duration::hours(1);
    system
        .create_artifact(&task_id, 0, "public/out.txt", later)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reference_artifact_url_update() {
    let system = test_system();
    let task_id = running_task(&system).await;
    let mut events = system.subscribe();

    let request = CreateArtifactRequest {
        content_type: "text/html".to_string(),
        expires: Utc::now() + Duration::hours(2),
        upload: UploadRequest::Reference {
            url: "https://one.example.com/result".to_string(),
        },
    };
    system
        .create_artifact(&task_id, 0, "public/result", request.clone())
        .await
        .unwrap();

    let mut updated = request;
    updated.upload = UploadRequest::Reference {
        url: "https://two.example.com/result".to_string(),
    };
    system
        .create_artifact(&task_id, 0, "public/result", updated)
        .await
        .unwrap();

    let download = system
        .get_artifact(&task_id, 0, "public/result", &AllowAll)
        .await
        .unwrap();
    assert_eq!(
        download,
        ArtifactDownload::Redirect {
            url: "https://two.example.com/result".to_string(),
        },
    );

    let mut created_events = 0;
    while let Ok(event) = events.try_recv() {
        if event.exchange == exchanges::ARTIFACT_CREATED {
            created_events += 1;
        }
    }
    assert!(created_events >= 1);
}

#[tokio::test]
async fn test_error_artifact_yields_error_payload() {
    let system = test_system();
    let task_id = running_task(&system).await;

    let request = CreateArtifactRequest {
        content_type: "application/json".to_string(),
        expires: Utc::now() + Duration::hours(2),
        upload: UploadRequest::Error {
            message: "file missing on worker".to_string(),
            reason: "file-missing-on-worker".to_string(),
        },
    };
    system
        .create_artifact(&task_id, 0, "public/missing.log", request)
        .await
        .unwrap();

    let download = system
        .get_artifact(&task_id, 0, "public/missing.log", &AllowAll)
        .await
        .unwrap();
    assert_eq!(
        download,
        ArtifactDownload::Error {
            message: "file missing on worker".to_string(),
            reason: "file-missing-on-worker".to_string(),
        },
    );
}

#[tokio::test]
async fn test_private_artifacts_require_scope() {
    let system = test_system();
    let task_id = running_task(&system).await;

    system
        .create_artifact(&task_id, 0, "private/secrets.txt", s3_request())
        .await
        .unwrap();

    let err = system
        .get_artifact(
            &task_id,
            0,
            "private/secrets.txt",
            &StaticScopeChecker::new(Vec::<String>::new()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InsufficientScopes(_)));

    let granted = StaticScopeChecker::new(["queue:get-artifact:private/*"]);
    system
        .get_artifact(&task_id, 0, "private/secrets.txt", &granted)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_artifact_expiry_bounded_by_task() {
    let system = test_system();
    let task_id = running_task(&system).await;

    let mut request = s3_request();
    request.expires = Utc::now() + Duration::days(600);
    let err = system
        .create_artifact(&task_id, 0, "public/out.txt", request)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InputError(_)));
}

#[tokio::test]
async fn test_artifact_requires_claimed_run() {
    let system = test_system();
    let task_id = generate_task_id();
    system.create_task(&task_id, task_def()).await.unwrap();

    // Run 0 is pending and was never claimed
    let err = system
        .create_artifact(&task_id, 0, "public/out.txt", s3_request())
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InputError(_)));
}

#[tokio::test]
async fn test_artifact_window_after_resolution() {
    let system = test_system();
    let task_id = running_task(&system).await;
    system.report_completed(&task_id, 0).await.unwrap();

    // Completed runs accept no further artifacts
    let err = system
        .create_artifact(&task_id, 0, "public/late.txt", s3_request())
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Conflict(_)));

    // Exception runs keep a grace window for post-mortem logs
    let crashed = running_task(&system).await;
    system
        .report_exception(&crashed, 0, ReasonResolved::InternalError)
        .await
        .unwrap();
    system
        .create_artifact(&crashed, 0, "public/crash.log", s3_request())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_get_latest_artifact() {
    let system = test_system();
    let task_id = generate_task_id();
    let mut def = task_def();
    def.retries = 1;
    system.create_task(&task_id, def).await.unwrap();
    system.claim_task(&task_id, 0, "wg", "w1").await.unwrap();
    system
        .report_exception(&task_id, 0, ReasonResolved::WorkerShutdown)
        .await
        .unwrap();
    system.claim_task(&task_id, 1, "wg", "w1").await.unwrap();

    system
        .create_artifact(&task_id, 1, "public/out.txt", s3_request())
        .await
        .unwrap();

    let download = system
        .get_latest_artifact(&task_id, "public/out.txt", &AllowAll)
        .await
        .unwrap();
    match download {
        ArtifactDownload::Redirect { url } => assert!(url.contains(&format!("{task_id}/1/"))),
        other => panic!("expected redirect, got {other:?}"),
    }
}

#[tokio::test]
async fn test_list_artifacts_pagination() {
    let system = test_system();
    let task_id = running_task(&system).await;

    for name in ["public/a.txt", "public/b.txt", "public/c.txt"] {
        system
            .create_artifact(&task_id, 0, name, s3_request())
            .await
            .unwrap();
    }

    let page = system.list_artifacts(&task_id, 0, None, 2).await.unwrap();
    assert_eq!(page.artifacts.len(), 2);
    let token = page.continuation_token.expect("more pages expected");

    let rest = system
        .list_artifacts(&task_id, 0, Some(&token), 2)
        .await
        .unwrap();
    assert_eq!(rest.artifacts.len(), 1);
    assert_eq!(rest.artifacts[0]["name"], "public/c.txt");
}
