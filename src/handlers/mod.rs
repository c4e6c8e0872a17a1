pub mod faults;
pub mod users;

use std::collections::HashMap;

use parking_lot::RwLock;

use users::User;

/// Shared demo state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    pub users: RwLock<HashMap<String, User>>,
}

impl AppState {
    /// A few users so `GET /api/users/:id` has something to find.
    pub fn seeded() -> Self {
        let users = [("1", "Ada Lovelace", "ada@example.com"), ("2", "Alan Turing", "alan@example.com")]
            .into_iter()
            .map(|(id, name, email)| {
                (
                    id.to_owned(),
                    User {
                        id: id.to_owned(),
                        name: name.to_owned(),
                        email: email.to_owned(),
                        created_at: chrono::Utc::now().to_rfc3339(),
                    },
                )
            })
            .collect();

        Self {
            users: RwLock::new(users),
        }
    }
}
