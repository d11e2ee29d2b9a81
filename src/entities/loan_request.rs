use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "loan_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub folio: String,
    pub requester_id: Uuid,
    pub approver_id: Option<Uuid>,
    pub status: String,
    pub created_at: DateTimeUtc,
    pub pickup_date: DateTimeUtc,
    pub return_due_date: DateTimeUtc,
    pub delivered_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::request_line::Entity")]
    RequestLine,
    #[sea_orm(has_many = "super::debt_entry::Entity")]
    DebtEntry,
}

impl Related<super::request_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RequestLine.def()
    }
}

impl Related<super::debt_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DebtEntry.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Lifecycle status of a loan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Approved,
    Delivered,
    Rejected,
    Cancelled,
    ExpiredNoPickup,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Delivered => "delivered",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::ExpiredNoPickup => "expired_no_pickup",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "approved" => Some(RequestStatus::Approved),
            "delivered" => Some(RequestStatus::Delivered),
            "rejected" => Some(RequestStatus::Rejected),
            "cancelled" => Some(RequestStatus::Cancelled),
            "expired_no_pickup" => Some(RequestStatus::ExpiredNoPickup),
            _ => None,
        }
    }
}
