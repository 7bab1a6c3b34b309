//! チャンク内の割当を識別するためのハンドル.

/// チャンクから確保された領域を識別するためのハンドル.
///
/// `allocate`の結果として返され、`free`時にそのまま渡される.
/// ハンドルは、それを発行したチャンクの内部でのみ意味を持つ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Handle {
    /// ラン(ページの2冪倍の連続領域)の割当.
    Run {
        /// バディ二分木内のノード番号.
        node: u32,
    },

    /// サブページ内の一要素の割当.
    Subpage {
        /// 対象ページ(木の葉)のノード番号.
        node: u32,

        /// ページ内のビットマップ上の要素番号.
        index: u32,
    },
}
impl Handle {
    /// このハンドルが対応する二分木のノード番号を返す.
    pub fn node(self) -> u32 {
        match self {
            Handle::Run { node } => node,
            Handle::Subpage { node, .. } => node,
        }
    }
}

/// `Handle`の内部表現のサイズを64bitにした構造体.
///
/// スレッドローカルキャッシュのような、大量のハンドルを保持する
/// データ構造では、各要素のメモリ使用量を節約することが
/// 重要となるので、そのような目的でこの構造体が提供されている.
///
/// 下位32bitにノード番号を、上位32bitに要素番号を保持する.
/// 要素番号`0`の正当なサブページ割当とランとを区別するために、
/// サブページ割当では上位ワードに予約タグビットが立てられる.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleU64(u64);

const SUBPAGE_TAG: u64 = 0x4000_0000_0000_0000;
const INDEX_MASK: u32 = 0x3FFF_FFFF;

impl From<Handle> for HandleU64 {
    fn from(f: Handle) -> Self {
        match f {
            Handle::Run { node } => HandleU64(u64::from(node)),
            Handle::Subpage { node, index } => {
                HandleU64(SUBPAGE_TAG | (u64::from(index) << 32) | u64::from(node))
            }
        }
    }
}
impl From<HandleU64> for Handle {
    fn from(f: HandleU64) -> Self {
        let node = f.0 as u32;
        let upper = (f.0 >> 32) as u32;
        if upper == 0 {
            Handle::Run { node }
        } else {
            Handle::Subpage {
                node,
                index: upper & INDEX_MASK,
            }
        }
    }
}
