mod batch_detail;
mod batch_list;
mod login;
mod task_detail;

pub use batch_detail::BatchDetailView;
pub use batch_list::BatchListView;
pub use login::LoginView;
pub use task_detail::TaskDetailView;
