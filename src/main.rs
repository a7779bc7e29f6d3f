#[rocket::main]
async fn main() -> Result<(), rocket::Error> {
    let _ = jobtrack::rocket().launch().await?;
    Ok(())
}
