pub mod assign;
pub mod auth;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod notify;
pub mod queues;
pub mod rooms;
pub mod routes;
pub mod sessions;
pub mod settings;
pub mod tasks;

use assign::AssignmentEngine;
use auth::TokenSecret;
use db::Db;
use events::EventBus;
use notify::Notifier;
use queues::QueueIndex;
use rocket_cors::CorsOptions;
use rooms::RoomStore;
use routes::TypingTracker;
use sessions::SessionRegistry;
use settings::SettingsCache;
use std::env;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let db_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "data/chat.db".to_string());
    rocket_with_db(&db_path)
}

pub fn rocket_with_db(db_path: &str) -> rocket::Rocket<rocket::Build> {
    // Ensure data directory exists
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let db = Db::new(db_path);
    let settings = SettingsCache::new(&db.conn());
    let secret = TokenSecret::from_env();
    let events = EventBus::new();
    let registry = SessionRegistry::new();
    let rooms = RoomStore::new();
    let queues = QueueIndex::new();
    let assign = AssignmentEngine::new();
    let notifier = Notifier::new();
    let typing_tracker = TypingTracker::default();

    let handles = tasks::EngineHandles {
        registry: registry.clone(),
        rooms: rooms.clone(),
        queues: queues.clone(),
        assign: assign.clone(),
        events: events.clone(),
        notifier: notifier.clone(),
    };
    let reassign_handles = handles.clone();
    let reaper_db = db.clone();
    let mailer_db_path = db_path.to_string();
    let reassign_db_path = db_path.to_string();

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    rocket::build()
        .manage(db)
        .manage(settings)
        .manage(secret)
        .manage(events)
        .manage(registry)
        .manage(rooms)
        .manage(queues)
        .manage(assign)
        .manage(notifier)
        .manage(typing_tracker)
        .attach(cors)
        .register(
            "/",
            rocket::catchers![routes::not_found, routes::unauthorized],
        )
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::stats,
                routes::connect,
                routes::event_stream,
                routes::disconnect_request,
                routes::user_typing_send,
                routes::user_stop_typing_send,
                routes::visitor_first_msg,
                routes::visitor_msg_unclaimed,
                routes::visitor_msg,
                routes::visitor_leave_room,
                routes::staff_join,
                routes::staff_msg,
                routes::staff_leave_room,
                routes::add_staff_to_chat,
                routes::remove_staff_from_chat,
                routes::update_staffs_in_chat,
                routes::take_over_chat,
                routes::change_chat_priority,
                routes::staff_handled_chat,
                routes::unclaimed_chats,
                routes::flagged_chats,
                routes::chat_messages,
                routes::mark_chat_seen,
                routes::notifications_feed,
                routes::notifications_read,
                routes::get_settings,
                routes::update_settings,
                routes::set_staff_disabled,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Email Dispatcher",
            move |_rocket| {
                Box::pin(async move {
                    let relay = env::var("MAIL_RELAY_URL").ok();
                    notify::spawn_email_dispatcher(mailer_db_path, relay);
                    println!("📧 Email dispatcher started");
                })
            },
        ))
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Reassignment Timer",
            move |_rocket| {
                Box::pin(async move {
                    tasks::spawn_reassign_task(reassign_db_path, reassign_handles);
                    println!("🔁 Reassignment timer started");
                })
            },
        ))
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Session Reaper",
            move |_rocket| {
                Box::pin(async move {
                    tasks::spawn_session_reaper(reaper_db, handles);
                    println!("🧹 Session liveness reaper started");
                })
            },
        ))
}
