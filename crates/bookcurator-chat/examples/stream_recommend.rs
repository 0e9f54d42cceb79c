use std::io::Write as _;
use std::sync::Arc;

use bookcurator_chat::config::load_dotenv;
use bookcurator_chat::observability::init_observability;
use bookcurator_chat::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ChatError> {
    load_dotenv();
    init_observability();

    let store: Arc<dyn KeyValueStore> = match std::env::var("BOOKCURATOR_STORE_PATH") {
        Ok(path) => Arc::new(JsonFileStore::open(path).map_err(ChatError::from)?),
        Err(_) => Arc::new(MemoryStore::new()),
    };
    let backend = HttpRecommendBackend::from_env()?;
    let max_books = backend.config().max_books;
    let mut chat = ChatController::new(Arc::new(backend), store).max_books(max_books);
    if let Ok(key) = std::env::var("GOOGLE_API_KEY") {
        chat.set_credential(&key)?;
    }

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let query = if query.trim().is_empty() {
        "올해 베스트셀러 추천해줘".to_string()
    } else {
        query
    };

    let mut rx = chat.subscribe();
    let printer = tokio::spawn(async move {
        let mut printed = 0;
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            let Some(reply) = snapshot.messages.last().filter(|m| m.role == Role::Assistant) else {
                continue;
            };
            if let Some(delta) = reply.content.get(printed..) {
                print!("{delta}");
                let _ = std::io::stdout().flush();
                printed = reply.content.len();
            }
            if !snapshot.is_loading {
                println!();
                if let Some(books) = &reply.books {
                    for book in books {
                        println!(
                            "- {} / {}",
                            book.title().unwrap_or("?"),
                            book.author().unwrap_or("?")
                        );
                    }
                }
                printed = 0;
            }
        }
    });

    let outcome = chat.send_message(&query).await;
    drop(chat);
    let _ = printer.await;
    eprintln!("send finished: {outcome:?}");
    Ok(())
}
