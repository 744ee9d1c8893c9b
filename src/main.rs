#[rocket::launch]
fn rocket() -> _ {
    helpline_chat::rocket()
}
