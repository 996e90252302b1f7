diesel::table! {
    actors (id) {
        id -> Uuid,
        username -> Varchar,
        role -> Varchar,
        seller_status -> Nullable<Varchar>,
        phone -> Nullable<Varchar>,
        address -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    stores (id) {
        id -> Uuid,
        owner_id -> Uuid,
        name -> Varchar,
        description -> Text,
        latitude -> Float8,
        longitude -> Float8,
        owner_photo -> Nullable<Varchar>,
        active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    tank_offerings (id) {
        id -> Uuid,
        store_id -> Uuid,
        tank_type -> Varchar,
        stock -> Int4,
        price -> Numeric,
        active -> Bool,
    }
}

diesel::table! {
    reservations (id) {
        id -> Uuid,
        customer_id -> Uuid,
        store_id -> Uuid,
        tank_id -> Uuid,
        name -> Varchar,
        status -> Varchar,
        pickup_proof -> Nullable<Varchar>,
        pickup_proof_uploaded_at -> Nullable<Timestamptz>,
        rejection_reason -> Nullable<Text>,
        reviewed_by -> Nullable<Uuid>,
        reviewed_at -> Nullable<Timestamptz>,
        notified -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    seller_applications (id) {
        id -> Uuid,
        actor_id -> Uuid,
        business_name -> Varchar,
        business_address -> Text,
        business_permit -> Varchar,
        dti_certificate -> Nullable<Varchar>,
        mayors_permit -> Nullable<Varchar>,
        valid_id -> Varchar,
        tin_number -> Nullable<Varchar>,
        phone -> Varchar,
        email -> Varchar,
        status -> Varchar,
        rejection_reason -> Nullable<Text>,
        reviewed_by -> Nullable<Uuid>,
        reviewed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    notifications (id) {
        id -> Uuid,
        recipient_id -> Uuid,
        message -> Text,
        reservation_id -> Nullable<Uuid>,
        is_read -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        recipient_id -> Uuid,
        message -> Text,
        reservation_id -> Nullable<Uuid>,
        processed -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(stores -> actors (owner_id));
diesel::joinable!(tank_offerings -> stores (store_id));
diesel::joinable!(reservations -> stores (store_id));
diesel::joinable!(reservations -> tank_offerings (tank_id));
diesel::joinable!(seller_applications -> actors (actor_id));
diesel::joinable!(notifications -> reservations (reservation_id));

diesel::allow_tables_to_appear_in_same_query!(
    actors,
    stores,
    tank_offerings,
    reservations,
    seller_applications,
    notifications,
    outbox_events,
);
