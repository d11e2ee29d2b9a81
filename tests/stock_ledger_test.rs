mod common;

use assert_matches::assert_matches;
use uuid::Uuid;

use common::{seed_material, test_db, test_services};
use labtrack_api::entities::{MaterialCategory, MaterialRef};
use labtrack_api::errors::ServiceError;
use labtrack_api::services::stock_ledger::StockLine;

#[tokio::test]
async fn get_stock_for_unknown_material_is_not_found() {
    let db = test_db().await;
    let services = test_services(db).await;

    let result = services
        .ledger
        .get_stock(MaterialRef::new(MaterialCategory::Liquid, 424242))
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn reserve_is_all_or_nothing() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let a = seed_material(&db, MaterialCategory::Liquid, "ethanol 96%", 100).await;
    let b = seed_material(&db, MaterialCategory::Solid, "sodium chloride", 10).await;

    let result = services
        .ledger
        .reserve(
            &[
                StockLine { material: a, quantity: 5 },
                StockLine { material: b, quantity: 999_999 },
            ],
            Uuid::new_v4(),
        )
        .await;

    // The error names the short material and nothing was decremented.
    assert_matches!(result, Err(ServiceError::InsufficientStock(name)) if name == "sodium chloride");
    assert_eq!(services.ledger.get_stock(a).await.unwrap().on_hand, 100);
    assert_eq!(services.ledger.get_stock(b).await.unwrap().on_hand, 10);
    assert_eq!(services.ledger.movement_total(a).await.unwrap(), 0);
}

#[tokio::test]
async fn set_absolute_logs_the_delta() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::Equipment, "microscope", 50).await;
    let actor = Uuid::new_v4();

    let level = services.ledger.set_absolute(m, 80, actor).await.unwrap();
    assert_eq!(level.on_hand, 80);
    assert_eq!(services.ledger.movement_total(m).await.unwrap(), 30);

    let level = services.ledger.set_absolute(m, 60, actor).await.unwrap();
    assert_eq!(level.on_hand, 60);
    assert_eq!(services.ledger.movement_total(m).await.unwrap(), 10);
}

#[tokio::test]
async fn set_absolute_rejects_negative_quantity() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::LabItem, "test tube", 20).await;
    let result = services.ledger.set_absolute(m, -1, Uuid::new_v4()).await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert_eq!(services.ledger.get_stock(m).await.unwrap().on_hand, 20);
}

#[tokio::test]
async fn bulk_adjust_applies_items_independently() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m1 = seed_material(&db, MaterialCategory::Solid, "agar", 10).await;
    let m2 = seed_material(&db, MaterialCategory::Solid, "glucose", 5).await;

    let outcomes = services
        .ledger
        .bulk_adjust_relative(&[(m1, -4), (m2, -6), (m1, 1)], Uuid::new_v4())
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].applied);
    // Would drive glucose to -1: rejected without rolling back the first item.
    assert!(!outcomes[1].applied);
    assert!(outcomes[1].error.is_some());
    assert!(outcomes[2].applied);

    assert_eq!(services.ledger.get_stock(m1).await.unwrap().on_hand, 7);
    assert_eq!(services.ledger.get_stock(m2).await.unwrap().on_hand, 5);
}

#[tokio::test]
async fn bulk_adjust_rejects_minimum_delta_without_touching_stock() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::Equipment, "autoclave", 12).await;

    let outcomes = services
        .ledger
        .bulk_adjust_relative(&[(m, i32::MIN), (m, -2)], Uuid::new_v4())
        .await
        .unwrap();

    // The unrepresentable delta is rejected as a per-item error, not a
    // panic, and later items still apply.
    assert!(!outcomes[0].applied);
    assert!(outcomes[0].error.is_some());
    assert!(outcomes[1].applied);
    assert_eq!(services.ledger.get_stock(m).await.unwrap().on_hand, 10);
}

#[tokio::test]
async fn stock_equals_initial_plus_movement_deltas() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    let m = seed_material(&db, MaterialCategory::Liquid, "distilled water", 100).await;
    let actor = Uuid::new_v4();

    services
        .ledger
        .reserve(&[StockLine { material: m, quantity: 20 }], actor)
        .await
        .unwrap();
    services
        .ledger
        .restore(
            &[StockLine { material: m, quantity: 5 }],
            actor,
            labtrack_api::entities::stock_movement::MovementType::Restoration,
        )
        .await
        .unwrap();
    services
        .ledger
        .bulk_adjust_relative(&[(m, -10)], actor)
        .await
        .unwrap();

    let on_hand = services.ledger.get_stock(m).await.unwrap().on_hand as i64;
    let total = services.ledger.movement_total(m).await.unwrap();
    assert_eq!(on_hand, 100 + total);
    assert_eq!(on_hand, 75);
}

#[tokio::test]
async fn low_stock_projection_spans_all_categories() {
    let db = test_db().await;
    let services = test_services(db.clone()).await;

    seed_material(&db, MaterialCategory::Liquid, "acetone", 3).await;
    seed_material(&db, MaterialCategory::Equipment, "burner", 2).await;
    seed_material(&db, MaterialCategory::Solid, "plenty", 500).await;

    let low = services.ledger.list_low_stock(10).await.unwrap();
    let names: Vec<&str> = low.iter().map(|l| l.name.as_str()).collect();
    assert!(names.contains(&"acetone"));
    assert!(names.contains(&"burner"));
    assert!(!names.contains(&"plenty"));
}
