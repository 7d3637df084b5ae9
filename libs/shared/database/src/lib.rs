pub mod supabase;

pub use supabase::{DbError, DbResult, SupabaseClient};
