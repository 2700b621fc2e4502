// Declaraciones Diesel escritas a mano; deben coincidir con `migrations/`.

diesel::table! {
    clients (client_id) {
        client_id -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    client_users (client_id, user_id) {
        client_id -> Text,
        user_id -> Text,
        priority -> SmallInt,
        status -> SmallInt,
        muted_until -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    messages (client_id, message_id) {
        client_id -> Text,
        message_id -> Text,
        user_id -> Text,
        category -> Text,
        data -> Text,
        quote_message_id -> Nullable<Text>,
        representative_id -> Nullable<Text>,
        status -> SmallInt,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    distribute_messages (message_id) {
        message_id -> Text,
        client_id -> Text,
        user_id -> Text,
        shard_id -> Text,
        conversation_id -> Text,
        origin_message_id -> Text,
        quote_message_id -> Nullable<Text>,
        category -> Text,
        data -> Text,
        representative_id -> Nullable<Text>,
        level -> SmallInt,
        status -> SmallInt,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    client_block_user (client_id, user_id) {
        client_id -> Text,
        user_id -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    block_user (user_id) {
        user_id -> Text,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(clients,
                                              client_users,
                                              messages,
                                              distribute_messages,
                                              client_block_user,
                                              block_user,);
