use trackable;

/// crate固有のエラー型.
#[derive(Debug, Clone, TrackableError)]
pub struct Error(trackable::error::TrackableError<ErrorKind>);

/// 発生し得るエラーの種別.
///
/// なお、空き領域不足による確保の失敗はエラーとしては扱われない
/// (高負荷時には頻繁に発生する正常な結果であるため、`Option`の`None`で表現される).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 入力が不正.
    ///
    /// チャンク構築時の設定値(ページサイズや木の深さ)が
    /// 許容範囲外の場合等にこのエラーが返される.
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者側のプログラムを修正して入力を正しくする
    InvalidInput,

    /// 内部状態が不整合に陥っている.
    ///
    /// プログラムにバグがあることを示している.
    ///
    /// # 典型的な対応策
    ///
    /// - バグ修正を行ってプログラムを更新する
    InconsistentState,

    /// その他エラー.
    Other,
}
impl trackable::error::ErrorKind for ErrorKind {}
