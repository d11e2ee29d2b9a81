use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "debt_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub request_id: Uuid,
    pub request_line_id: Uuid,
    pub requester_id: Uuid,
    pub material_id: i64,
    pub category: String,
    pub pending_quantity: i32,
    pub due_date: DateTimeUtc,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::loan_request::Entity",
        from = "Column::RequestId",
        to = "super::loan_request::Column::Id"
    )]
    LoanRequest,
}

impl Related<super::loan_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LoanRequest.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
