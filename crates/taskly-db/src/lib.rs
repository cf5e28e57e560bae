pub use sea_orm;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema};

pub mod entities;

pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(database_url).await
}

// Create the tables (and their indexes) straight from the entity definitions when they
// do not exist yet. Order matters: users must exist before the tables that reference it.
pub async fn ensure_schema<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    create_from_entity(db, entities::users::Entity).await?;
    create_from_entity(db, entities::tasks::Entity).await?;
    create_from_entity(db, entities::refresh_tokens::Entity).await
}

async fn create_from_entity<C, E>(db: &C, entity: E) -> Result<(), DbErr>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut table = schema.create_table_from_entity(entity);
    table.if_not_exists();
    db.execute(backend.build(&table)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }
    Ok(())
}
