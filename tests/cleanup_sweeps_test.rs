mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, Set};

use common::{instructor, seed_material, student, test_db, test_services};
use labtrack_api::entities::loan_request::{self, RequestStatus};
use labtrack_api::entities::MaterialCategory;
use labtrack_api::errors::ServiceError;
use labtrack_api::services::requests::NewRequestLine;

fn line(material: labtrack_api::entities::MaterialRef, quantity: i32) -> NewRequestLine {
    NewRequestLine { material, quantity }
}

#[tokio::test]
async fn purge_sweep_restores_stock_and_deletes_the_request() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::Liquid, "formaldehyde", 100).await;

    let detail = services
        .requests
        .create(
            student(),
            &[line(m, 20)],
            Utc::now() + Duration::days(1),
            Utc::now() + Duration::days(7),
            None,
        )
        .await
        .unwrap();
    services
        .requests
        .approve(detail.request.id, instructor().user_id)
        .await
        .unwrap();
    assert_eq!(services.ledger.get_stock(m).await.unwrap().on_hand, 80);

    // Sweep from a vantage point after the pickup date.
    let report = services
        .cleanup
        .purge_expired_approved(Utc::now() + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.affected, 1);
    assert_eq!(report.failed, 0);

    assert_eq!(services.ledger.get_stock(m).await.unwrap().on_hand, 100);
    assert_matches!(
        services.requests.get_request(detail.request.id).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn pickup_missed_sweep_only_marks_pending_requests() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::Equipment, "oscilloscope", 10).await;

    let pending = services
        .requests
        .create(
            student(),
            &[line(m, 1)],
            Utc::now() + Duration::days(1),
            Utc::now() + Duration::days(7),
            None,
        )
        .await
        .unwrap();
    let approved = services
        .requests
        .create(
            student(),
            &[line(m, 2)],
            Utc::now() + Duration::days(1),
            Utc::now() + Duration::days(7),
            None,
        )
        .await
        .unwrap();
    services
        .requests
        .approve(approved.request.id, instructor().user_id)
        .await
        .unwrap();

    let report = services
        .cleanup
        .mark_missed_pickups(Utc::now() + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(report.affected, 1);

    let reloaded = services.requests.get_request(pending.request.id).await.unwrap();
    assert_eq!(
        reloaded.request.status,
        RequestStatus::ExpiredNoPickup.as_str()
    );
    // Approved requests belong to the purge sweep, not this one.
    let untouched = services.requests.get_request(approved.request.id).await.unwrap();
    assert_eq!(untouched.request.status, RequestStatus::Approved.as_str());
    // The sweep never touches stock.
    assert_eq!(services.ledger.get_stock(m).await.unwrap().on_hand, 8);
}

#[tokio::test]
async fn stale_sweep_deletes_expired_requests_past_the_grace_window() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::Solid, "potassium nitrate", 30).await;

    let detail = services
        .requests
        .create(
            student(),
            &[line(m, 3)],
            Utc::now() + Duration::days(1),
            Utc::now() + Duration::days(7),
            None,
        )
        .await
        .unwrap();

    // Expire it first, then let the grace window lapse.
    services
        .cleanup
        .mark_missed_pickups(Utc::now() + Duration::days(2))
        .await
        .unwrap();

    let before_grace = services
        .cleanup
        .purge_stale(Utc::now() + Duration::days(3))
        .await
        .unwrap();
    assert_eq!(before_grace.affected, 0);
    assert!(services.requests.get_request(detail.request.id).await.is_ok());

    // Default grace is 14 days past the pickup date.
    let after_grace = services
        .cleanup
        .purge_stale(Utc::now() + Duration::days(20))
        .await
        .unwrap();
    assert_eq!(after_grace.affected, 1);
    assert_matches!(
        services.requests.get_request(detail.request.id).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn stale_sweep_deletes_requests_past_the_retention_window() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::LabItem, "beaker", 15).await;

    let detail = services
        .requests
        .create(
            student(),
            &[line(m, 1)],
            Utc::now() + Duration::days(1),
            Utc::now() + Duration::days(7),
            None,
        )
        .await
        .unwrap();

    // Backdate creation beyond the retention window (default 180 days).
    let mut active: loan_request::ActiveModel = detail.request.clone().into();
    active.created_at = Set(Utc::now() - Duration::days(200));
    active.update(&*db).await.unwrap();

    let report = services.cleanup.purge_stale(Utc::now()).await.unwrap();
    assert_eq!(report.affected, 1);
    assert_matches!(
        services.requests.get_request(detail.request.id).await,
        Err(ServiceError::NotFound(_))
    );
}
