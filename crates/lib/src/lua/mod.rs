//! Lua front end.
//!
//! User code is a Lua script that builds the construct tree through the
//! `cdk` global. Evaluation is single-threaded; all objects share one
//! [`App`](crate::construct::App) behind an `Rc<RefCell<_>>`.
//!
//! - [`globals`] - the `cdk` table and its constructors
//! - [`objects`] - userdata returned to scripts
//! - [`options`] - option tables accepted by the constructors
//! - [`runtime`] - VM creation and script loading

pub mod globals;
pub mod objects;
pub mod options;
pub mod runtime;
