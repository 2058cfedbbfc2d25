diesel::table! {
    inventory (id) {
        id -> Uuid,
        name -> Varchar,
        category -> Varchar,
        quantity -> Int4,
        unit -> Varchar,
        description -> Nullable<Text>,
        available -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    donations (id) {
        id -> Uuid,
        user_id -> Uuid,
        item_name -> Varchar,
        category -> Varchar,
        quantity -> Int4,
        unit -> Varchar,
        status -> Varchar,
        description -> Nullable<Text>,
        notes -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    requests (id) {
        id -> Uuid,
        user_id -> Uuid,
        item_id -> Uuid,
        quantity -> Int4,
        status -> Varchar,
        rejection_reason -> Nullable<Text>,
        description -> Nullable<Text>,
        notes -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    donations,
    inventory,
    requests,
);
