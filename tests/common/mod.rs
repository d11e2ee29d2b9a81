use std::sync::Arc;
use std::time::Duration;

use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use labtrack_api::auth::{AuthenticatedUser, Role};
use labtrack_api::config::AppConfig;
use labtrack_api::db::{self, DbConfig};
use labtrack_api::entities::{
    equipment, lab_item, liquid_material, solid_material, MaterialCategory, MaterialRef,
};
use labtrack_api::events::EventSender;
use labtrack_api::services::AppServices;

/// In-memory SQLite pool limited to one connection so every query sees the
/// same database.
pub async fn test_db() -> Arc<DatabaseConnection> {
    let cfg = DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        connect_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(600),
        acquire_timeout: Duration::from_secs(5),
    };
    let pool = db::establish_connection_with_config(&cfg)
        .await
        .expect("db connect");
    db::run_migrations(&pool).await.expect("migrations");
    Arc::new(pool)
}

pub async fn test_services(db: Arc<DatabaseConnection>) -> AppServices {
    let (tx, mut rx) = mpsc::channel(64);
    // Drain events so emitters never see a closed channel.
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        "test_secret_key_for_testing_purposes_only_32chars".to_string(),
        "127.0.0.1".to_string(),
        0,
    );
    AppServices::new(db, EventSender::new(tx), &cfg)
}

pub fn student() -> AuthenticatedUser {
    AuthenticatedUser {
        user_id: Uuid::new_v4(),
        role: Role::Student,
    }
}

pub fn instructor() -> AuthenticatedUser {
    AuthenticatedUser {
        user_id: Uuid::new_v4(),
        role: Role::Instructor,
    }
}

pub fn storekeeper() -> AuthenticatedUser {
    AuthenticatedUser {
        user_id: Uuid::new_v4(),
        role: Role::Storekeeper,
    }
}

/// Seeds one material in the given category and returns its reference.
pub async fn seed_material(
    db: &DatabaseConnection,
    category: MaterialCategory,
    name: &str,
    quantity: i32,
) -> MaterialRef {
    let id = match category {
        MaterialCategory::Liquid => {
            liquid_material::ActiveModel {
                name: Set(name.to_string()),
                available_milliliters: Set(quantity),
                unit: Set("ml".to_string()),
                ..Default::default()
            }
            .insert(db)
            .await
            .expect("seed liquid")
            .id
        }
        MaterialCategory::Solid => {
            solid_material::ActiveModel {
                name: Set(name.to_string()),
                available_grams: Set(quantity),
                unit: Set("g".to_string()),
                ..Default::default()
            }
            .insert(db)
            .await
            .expect("seed solid")
            .id
        }
        MaterialCategory::Equipment => {
            equipment::ActiveModel {
                name: Set(name.to_string()),
                units_on_hand: Set(quantity),
                unit: Set("unit".to_string()),
                ..Default::default()
            }
            .insert(db)
            .await
            .expect("seed equipment")
            .id
        }
        MaterialCategory::LabItem => {
            lab_item::ActiveModel {
                name: Set(name.to_string()),
                stock_count: Set(quantity),
                unit: Set("piece".to_string()),
                ..Default::default()
            }
            .insert(db)
            .await
            .expect("seed lab item")
            .id
        }
    };
    MaterialRef::new(category, id)
}
