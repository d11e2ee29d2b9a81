mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};

use common::{instructor, seed_material, storekeeper, student, test_db, test_services};
use labtrack_api::entities::loan_request::RequestStatus;
use labtrack_api::entities::{MaterialCategory, MaterialRef};
use labtrack_api::errors::ServiceError;
use labtrack_api::services::debts::ReturnLine;
use labtrack_api::services::requests::{DeliveredLine, NewRequestLine};

fn line(material: MaterialRef, quantity: i32) -> NewRequestLine {
    NewRequestLine { material, quantity }
}

#[tokio::test]
async fn full_lifecycle_create_approve_deliver_return() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m1 = seed_material(&db, MaterialCategory::Liquid, "hydrochloric acid", 100).await;
    let requester = student();
    let keeper = storekeeper();

    let detail = services
        .requests
        .create(
            requester,
            &[line(m1, 5)],
            Utc::now() + Duration::days(1),
            Utc::now() + Duration::days(7),
            None,
        )
        .await
        .unwrap();
    let request_id = detail.request.id;
    assert_eq!(detail.request.status, RequestStatus::Pending.as_str());
    assert!(detail.request.folio.starts_with("SOL-"));
    assert_eq!(detail.lines.len(), 1);

    // Approval reserves the stock.
    let approved = services
        .requests
        .approve(request_id, instructor().user_id)
        .await
        .unwrap();
    assert_eq!(approved.status, RequestStatus::Approved.as_str());
    assert_eq!(services.ledger.get_stock(m1).await.unwrap().on_hand, 95);

    // Full delivery opens one debt per delivered line.
    let line_id = detail.lines[0].id;
    let debts_opened = services
        .requests
        .deliver(request_id, &[DeliveredLine { line_id, quantity: 5 }], keeper)
        .await
        .unwrap();
    assert_eq!(debts_opened, 1);

    let debts = services.debts.list_open_debts(Some(requester.user_id)).await.unwrap();
    assert_eq!(debts.len(), 1);
    assert_eq!(debts[0].pending_quantity, 5);
    assert_eq!(debts[0].material_name, "hydrochloric acid");

    // Returning everything closes the debt and removes the request.
    let outcome = services
        .debts
        .resolve_partial(request_id, &[ReturnLine { line_id, quantity: 5 }])
        .await
        .unwrap();
    assert!(outcome.request_closed);
    assert_eq!(outcome.open_debts, 0);

    assert_matches!(
        services.requests.get_request(request_id).await,
        Err(ServiceError::NotFound(_))
    );
    // No restoration on a completed loan: the reservation stays consumed.
    assert_eq!(services.ledger.get_stock(m1).await.unwrap().on_hand, 95);

    // A repeated return on the deleted request is NotFound, not a crash.
    assert_matches!(
        services
            .debts
            .resolve_partial(request_id, &[ReturnLine { line_id, quantity: 1 }])
            .await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn approve_with_insufficient_stock_changes_nothing() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let a = seed_material(&db, MaterialCategory::Solid, "copper sulfate", 50).await;
    let b = seed_material(&db, MaterialCategory::Equipment, "centrifuge", 10).await;

    let detail = services
        .requests
        .create(
            student(),
            &[line(a, 5), line(b, 999_999)],
            Utc::now() + Duration::days(1),
            Utc::now() + Duration::days(7),
            None,
        )
        .await
        .unwrap();

    let result = services
        .requests
        .approve(detail.request.id, instructor().user_id)
        .await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(name)) if name == "centrifuge");

    assert_eq!(services.ledger.get_stock(a).await.unwrap().on_hand, 50);
    assert_eq!(services.ledger.get_stock(b).await.unwrap().on_hand, 10);
    let reloaded = services.requests.get_request(detail.request.id).await.unwrap();
    assert_eq!(reloaded.request.status, RequestStatus::Pending.as_str());
}

#[tokio::test]
async fn instructor_requests_are_auto_approved_with_reservation() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::LabItem, "petri dish", 40).await;
    let requester = instructor();

    let detail = services
        .requests
        .create(
            requester,
            &[line(m, 10)],
            Utc::now() + Duration::days(1),
            Utc::now() + Duration::days(7),
            None,
        )
        .await
        .unwrap();

    assert_eq!(detail.request.status, RequestStatus::Approved.as_str());
    assert_eq!(detail.request.approver_id, Some(requester.user_id));
    assert_eq!(services.ledger.get_stock(m).await.unwrap().on_hand, 30);
}

#[tokio::test]
async fn partial_delivery_releases_undelivered_reservations() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let x = seed_material(&db, MaterialCategory::Liquid, "methanol", 50).await;
    let y = seed_material(&db, MaterialCategory::Solid, "iron filings", 20).await;
    let requester = student();

    let detail = services
        .requests
        .create(
            requester,
            &[line(x, 10), line(y, 5)],
            Utc::now() + Duration::days(1),
            Utc::now() + Duration::days(7),
            None,
        )
        .await
        .unwrap();
    let request_id = detail.request.id;
    services
        .requests
        .approve(request_id, instructor().user_id)
        .await
        .unwrap();
    assert_eq!(services.ledger.get_stock(x).await.unwrap().on_hand, 40);
    assert_eq!(services.ledger.get_stock(y).await.unwrap().on_hand, 15);

    let line_x = detail
        .lines
        .iter()
        .find(|l| l.material_id == x.id)
        .unwrap()
        .id;

    // Only 6 of X's 10 are handed over; Y is a no-show.
    let debts_opened = services
        .requests
        .deliver(
            request_id,
            &[DeliveredLine { line_id: line_x, quantity: 6 }],
            storekeeper(),
        )
        .await
        .unwrap();
    assert_eq!(debts_opened, 1);

    let reloaded = services.requests.get_request(request_id).await.unwrap();
    assert_eq!(reloaded.request.status, RequestStatus::Delivered.as_str());
    // Y's line is gone; X's line records the delivered quantity.
    assert_eq!(reloaded.lines.len(), 1);
    assert_eq!(reloaded.lines[0].delivered_quantity, Some(6));

    let debts = services.debts.list_open_debts(Some(requester.user_id)).await.unwrap();
    assert_eq!(debts.len(), 1);
    assert_eq!(debts[0].pending_quantity, 6);

    // Undelivered remainders flow back to inventory: X gets 4 back, Y all 5.
    assert_eq!(services.ledger.get_stock(x).await.unwrap().on_hand, 44);
    assert_eq!(services.ledger.get_stock(y).await.unwrap().on_hand, 20);
}

#[tokio::test]
async fn empty_delivery_still_transitions_and_opens_no_debts() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::Equipment, "hot plate", 8).await;
    let requester = student();

    let detail = services
        .requests
        .create(
            requester,
            &[line(m, 3)],
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

    let debts_opened = services
        .requests
        .deliver(detail.request.id, &[], storekeeper())
        .await
        .unwrap();
    assert_eq!(debts_opened, 0);

    let reloaded = services.requests.get_request(detail.request.id).await.unwrap();
    assert_eq!(reloaded.request.status, RequestStatus::Delivered.as_str());
    assert!(reloaded.lines.is_empty());
    assert!(services
        .debts
        .list_open_debts(Some(requester.user_id))
        .await
        .unwrap()
        .is_empty());
    // The whole reservation was released.
    assert_eq!(services.ledger.get_stock(m).await.unwrap().on_hand, 8);
}

#[tokio::test]
async fn returns_are_clamped_and_partial_returns_keep_request_open() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::Liquid, "glycerol", 30).await;
    let requester = student();

    let detail = services
        .requests
        .create(
            requester,
            &[line(m, 6)],
            Utc::now() + Duration::days(1),
            Utc::now() + Duration::days(7),
            None,
        )
        .await
        .unwrap();
    let request_id = detail.request.id;
    let line_id = detail.lines[0].id;
    services
        .requests
        .approve(request_id, instructor().user_id)
        .await
        .unwrap();
    services
        .requests
        .deliver(request_id, &[DeliveredLine { line_id, quantity: 6 }], storekeeper())
        .await
        .unwrap();

    // Over-return is rejected outright.
    assert_matches!(
        services
            .debts
            .resolve_partial(request_id, &[ReturnLine { line_id, quantity: 7 }])
            .await,
        Err(ServiceError::ValidationError(_))
    );

    // 3 of 6 back: debt shrinks, request stays delivered.
    let outcome = services
        .debts
        .resolve_partial(request_id, &[ReturnLine { line_id, quantity: 3 }])
        .await
        .unwrap();
    assert!(!outcome.request_closed);
    assert_eq!(outcome.open_debts, 1);

    let debts = services.debts.list_open_debts(Some(requester.user_id)).await.unwrap();
    assert_eq!(debts[0].pending_quantity, 3);
    let reloaded = services.requests.get_request(request_id).await.unwrap();
    assert_eq!(reloaded.request.status, RequestStatus::Delivered.as_str());
}

#[tokio::test]
async fn reject_is_only_valid_from_pending() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::Solid, "calcium carbonate", 25).await;
    let detail = services
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
        .approve(detail.request.id, instructor().user_id)
        .await
        .unwrap();

    assert_matches!(
        services.requests.reject(detail.request.id).await,
        Err(ServiceError::Conflict(_))
    );

    // A pending request rejects cleanly and disappears.
    let other = services
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
    services.requests.reject(other.request.id).await.unwrap();
    assert_matches!(
        services.requests.get_request(other.request.id).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn cancellation_asymmetry_requester_deletes_staff_soft_marks() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::LabItem, "pipette", 60).await;
    let requester = student();

    // Requester cancelling their own pending request deletes it.
    let own = services
        .requests
        .create(
            requester,
            &[line(m, 4)],
            Utc::now() + Duration::days(1),
            Utc::now() + Duration::days(7),
            None,
        )
        .await
        .unwrap();
    services.requests.cancel(own.request.id, requester).await.unwrap();
    assert_matches!(
        services.requests.get_request(own.request.id).await,
        Err(ServiceError::NotFound(_))
    );

    // Staff cancelling someone else's request keeps it for audit.
    let theirs = services
        .requests
        .create(
            requester,
            &[line(m, 4)],
            Utc::now() + Duration::days(1),
            Utc::now() + Duration::days(7),
            None,
        )
        .await
        .unwrap();
    services
        .requests
        .approve(theirs.request.id, instructor().user_id)
        .await
        .unwrap();
    services
        .requests
        .cancel(theirs.request.id, storekeeper())
        .await
        .unwrap();
    let reloaded = services.requests.get_request(theirs.request.id).await.unwrap();
    assert_eq!(reloaded.request.status, RequestStatus::Cancelled.as_str());

    // A stranger without a staff role may not cancel at all.
    let third = services
        .requests
        .create(
            requester,
            &[line(m, 1)],
            Utc::now() + Duration::days(1),
            Utc::now() + Duration::days(7),
            None,
        )
        .await
        .unwrap();
    assert_matches!(
        services.requests.cancel(third.request.id, student()).await,
        Err(ServiceError::Forbidden(_))
    );
}

#[tokio::test]
async fn concurrent_approvals_reserve_stock_only_once() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::Liquid, "acetic acid", 10).await;
    let detail = services
        .requests
        .create(
            student(),
            &[line(m, 4)],
            Utc::now() + Duration::days(1),
            Utc::now() + Duration::days(7),
            None,
        )
        .await
        .unwrap();
    let request_id = detail.request.id;

    let (first, second) = tokio::join!(
        services.requests.approve(request_id, instructor().user_id),
        services.requests.approve(request_id, instructor().user_id),
    );

    // Exactly one approval wins; the loser sees the already-claimed status.
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find(|r| r.is_err()).unwrap();
    assert_matches!(loser, Err(ServiceError::Conflict(_)));

    // Stock was decremented exactly once.
    assert_eq!(services.ledger.get_stock(m).await.unwrap().on_hand, 6);
    let reloaded = services.requests.get_request(request_id).await.unwrap();
    assert_eq!(reloaded.request.status, RequestStatus::Approved.as_str());
}

#[tokio::test]
async fn concurrent_deliveries_open_debts_only_once() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::Solid, "sucrose", 20).await;
    let requester = student();
    let detail = services
        .requests
        .create(
            requester,
            &[line(m, 5)],
            Utc::now() + Duration::days(1),
            Utc::now() + Duration::days(7),
            None,
        )
        .await
        .unwrap();
    let request_id = detail.request.id;
    let line_id = detail.lines[0].id;
    services
        .requests
        .approve(request_id, instructor().user_id)
        .await
        .unwrap();

    let delivered = [DeliveredLine { line_id, quantity: 5 }];
    let (first, second) = tokio::join!(
        services.requests.deliver(request_id, &delivered, storekeeper()),
        services.requests.deliver(request_id, &delivered, storekeeper()),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_matches!(
        results.iter().find(|r| r.is_err()).unwrap(),
        Err(ServiceError::Conflict(_))
    );

    // One debt, not two.
    let debts = services
        .debts
        .list_open_debts(Some(requester.user_id))
        .await
        .unwrap();
    assert_eq!(debts.len(), 1);
    assert_eq!(debts[0].pending_quantity, 5);
}

#[tokio::test]
async fn create_validations() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::Liquid, "buffer solution", 10).await;
    let pickup = Utc::now() + Duration::days(1);
    let due = Utc::now() + Duration::days(7);

    // Empty lines
    assert_matches!(
        services.requests.create(student(), &[], pickup, due, None).await,
        Err(ServiceError::ValidationError(_))
    );
    // Non-positive quantity
    assert_matches!(
        services
            .requests
            .create(student(), &[line(m, 0)], pickup, due, None)
            .await,
        Err(ServiceError::ValidationError(_))
    );
    // Unknown material
    assert_matches!(
        services
            .requests
            .create(
                student(),
                &[line(MaterialRef::new(MaterialCategory::Solid, 9999), 1)],
                pickup,
                due,
                None
            )
            .await,
        Err(ServiceError::NotFound(_))
    );
    // Pickup far in the past (beyond the grace window)
    assert_matches!(
        services
            .requests
            .create(student(), &[line(m, 1)], Utc::now() - Duration::days(3), due, None)
            .await,
        Err(ServiceError::ValidationError(_))
    );
    // Return before pickup
    assert_matches!(
        services
            .requests
            .create(student(), &[line(m, 1)], pickup, pickup - Duration::days(1), None)
            .await,
        Err(ServiceError::ValidationError(_))
    );
}
