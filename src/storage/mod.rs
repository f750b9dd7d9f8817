mod db_files;
mod file_manager;
mod page;

pub use db_files::DBFiles;
pub use file_manager::FileManager;
pub use page::Page;
