//! モデル定義
//!
//! ユーザーが宣言したあるべき状態を表す型。

mod address;
mod declaration;
mod expr;
mod resource;

// 再エクスポート
pub use address::*;
pub use declaration::*;
pub use expr::*;
pub use resource::*;
