use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "generations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub image_path: Option<String>,
    pub model_path: Option<String>,
    pub created_at_us: i64,
    pub metadata: Option<String>,
    pub parent_id: Option<i64>,
}

impl ActiveModelBehavior for ActiveModel {}
