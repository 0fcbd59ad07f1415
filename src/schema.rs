// Pipetree schema - pipeline graph tables for Diesel ORM

diesel::table! {
    schema_versions (id) {
        id -> Integer,
        version -> Text,
        name -> Text,
        features -> Text,
        introduced_at -> Text,
    }
}

diesel::table! {
    projects (id) {
        id -> Integer,
        node_key -> Text,
        author -> Text,
        name -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    pipelines (id) {
        id -> Integer,
        node_key -> Text,
        author -> Text,
        project -> Text,
        name -> Text,
        complete -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    boxes (id) {
        id -> Integer,
        node_key -> Text,
        author -> Text,
        project -> Text,
        parent -> Text,
        name -> Text,
        complete -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    tasks (id) {
        id -> Integer,
        node_key -> Text,
        author -> Text,
        name -> Text,
        status -> Text,
        created_at -> Text,
    }
}

// One edge table for project->pipeline, parent->box and task->box links.
// Endpoints are `collection/key` strings.
diesel::table! {
    edges (id) {
        id -> Integer,
        edge_key -> Text,
        from_id -> Text,
        to_id -> Text,
        author -> Text,
        project -> Text,
        parent -> Nullable<Text>,
        created_at -> Text,
    }
}
