diesel::table! {
    linked_accounts (id) {
        id -> Integer,
        slack_user_id -> Text,
        slack_team_id -> Text,
        gitlab_user_id -> BigInt,
        gitlab_username -> Text,
        gitlab_email -> Nullable<Text>,
        access_token -> Text,
        refresh_token -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    notifications (id) {
        id -> Integer,
        account_id -> BigInt,
        event_kind -> Text,
        project_id -> BigInt,
        merge_request_iid -> BigInt,
        object_id -> BigInt,
        payload -> Text,
        sent_at -> Text,
    }
}

diesel::table! {
    webhook_logs (id) {
        id -> Integer,
        event_type -> Text,
        project_id -> Nullable<BigInt>,
        object_id -> Nullable<BigInt>,
        processed -> Bool,
        received_at -> Text,
        error_message -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(linked_accounts, notifications, webhook_logs,);
