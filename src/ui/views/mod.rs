mod groups;
mod packs;
mod selections;
mod users;

pub use groups::GroupListView;
pub use packs::PackListView;
pub use selections::SelectionListView;
pub use users::UserListView;
