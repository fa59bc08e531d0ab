use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};

const USER_FK: ForeignKey = ForeignKey {
    foreign_table: "user",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const TRACK_FK: ForeignKey = ForeignKey {
    foreign_table: "track",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

// Tags can only go away once nothing references them.
const TAG_FK: ForeignKey = ForeignKey {
    foreign_table: "tag",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Restrict,
};

pub const USER_TABLE_V_0: Table = Table {
    name: "user",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("handle", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
    unique_constraints: &[],
};

pub const AUTH_TOKEN_TABLE_V_0: Table = Table {
    name: "auth_token",
    columns: &[
        sqlite_column!(
            "user_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&USER_FK)
        ),
        sqlite_column!("value", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_auth_token_value", "value")],
    unique_constraints: &[],
};

pub const TRACK_TABLE_V_0: Table = Table {
    name: "track",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "user_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&USER_FK)
        ),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("locator", &SqlType::Text, non_null = true),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_track_user", "user_id")],
    unique_constraints: &[],
};

pub const TAG_TABLE_V_0: Table = Table {
    name: "tag",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true, is_unique = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

pub const PREDICTION_TABLE_V_0: Table = Table {
    name: "prediction",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "track_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&TRACK_FK)
        ),
        sqlite_column!(
            "tag_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TAG_FK)
        ),
        sqlite_column!("confidence", &SqlType::Real, non_null = true),
        sqlite_column!("source", &SqlType::Text, non_null = true),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_prediction_tag", "tag_id")],
    unique_constraints: &[&["track_id", "tag_id"]],
};

pub const VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        USER_TABLE_V_0,
        AUTH_TOKEN_TABLE_V_0,
        TRACK_TABLE_V_0,
        TAG_TABLE_V_0,
        PREDICTION_TABLE_V_0,
    ],
    migration: None,
}];
