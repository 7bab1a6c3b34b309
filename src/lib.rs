//! Pooled Page Allocator.
//!
//! `pagepool`は、ネットワークI/O用のバッファのように、様々なサイズのバイトバッファの
//! 確保・解放を高頻度で繰り返すワークロードに向けた、プール型メモリアロケータのエンジン部分.
//!
//! # 特徴
//!
//! - 固定長の連続メモリ領域([チャンク][chunk])を、完全二分木(バディシステム)で管理
//!   - ページの2冪倍の連続領域("ラン")の確保・解放が`O(log チャンクサイズ)`で行える
//! - ページ未満のサイズの要求は、一つのページをビットマップで等分割する
//!   [サブページアロケータ][subpage]に委譲される
//! - 空き不足による確保の失敗は、エラーではなく通常の結果(`None`)として返される
//!   - 呼び出し側は別のチャンクを試す、ないし新規チャンクを用意することで回復できる
//! - メモリ領域そのものの獲得・解放は本クレートの責務外
//!   - チャンクは、与えられた領域内のオフセット計算のみを担当する
//!
//! # モジュールの依存関係
//!
//! ```text
//! chunk => subpage => page
//! ```
//!
//! - [chunk]モジュール:
//!   - 主に[Chunk]構造体を提供
//!   - 一つの固定長領域の上にバディ二分木を重ね、ランの確保・解放を担当する
//! - [subpage]モジュール:
//!   - 主に[Subpage]構造体と、サイズクラス毎のリスト([SubpagePool])を提供
//!   - 一つのページを等分割し、占有状況をビットマップで管理する
//! - [page]モジュール:
//!   - ページサイズ([PageSize])の検証・アライメント計算と、
//!     チャンク用メモリとして利用可能なページ境界揃えのバイト列を提供する
//!
//! # ロックモデル
//!
//! 全ての更新操作は`&mut self`を要求し、排他制御は呼び出し側(プール管理層)が担う.
//! 想定されるロックスコープは互いに独立な二種類:
//!
//! 1. チャンク群を所有するアリーナ単位のロック(木の状態・空きバイト数・ページスロットを保護)
//! 2. サイズクラス単位のロック(サブページのリスト連結と、リスト経由で触れるビットマップを保護)
//!
//! [chunk]: ./chunk/index.html
//! [Chunk]: ./chunk/struct.Chunk.html
//! [subpage]: ./subpage/index.html
//! [SubpagePool]: ./subpage/struct.SubpagePool.html
//! [Subpage]: ./subpage/struct.Subpage.html
//! [page]: ./page/index.html
//! [PageSize]: ./page/struct.PageSize.html
#![warn(missing_docs)]
extern crate prometrics;
#[macro_use]
extern crate slog;
#[macro_use]
extern crate trackable;
extern crate uuid;

pub use crate::error::{Error, ErrorKind};

pub mod chunk;
pub mod metrics;
pub mod page;
pub mod subpage;

mod error;

/// crate固有の`Result`型.
pub type Result<T> = std::result::Result<T, Error>;
