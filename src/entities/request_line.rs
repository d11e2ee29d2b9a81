use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "request_lines")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub request_id: Uuid,
    pub material_id: i64,
    pub category: String,
    pub requested_quantity: i32,
    pub delivered_quantity: Option<i32>,
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
