//! サイズクラス毎のサブページリスト.

use std::collections::BTreeMap;

use crate::chunk::ChunkId;

/// サイズクラスのリスト内でサブページを識別するためのキー.
///
/// サブページの実体はチャンク側の配列が所有しているため、
/// リストには「どのチャンクのどのページか」を示すキーのみが保持される.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubpageKey {
    /// サブページを所有するチャンクの識別子.
    pub chunk: ChunkId,

    /// サブページが重なっているページ(木の葉)のノード番号.
    pub node: u32,
}

/// 一つのサイズクラスに属する、空き容量のあるサブページ群のリスト.
///
/// 番兵をリストの先頭とする循環双方向リストであり、
/// 挿入は常に先頭の直後へ、削除は前後の繋ぎ替え(splice)で行われる.
/// リンクノードはリスト自身が保持するスラブ(番号0が番兵)に格納され、
/// 削除されたノードの番号は再利用される.
///
/// リストの連結操作は、サブページのビットマップ更新と同じく、
/// このサイズクラス用のロックの下でのみ行われることが想定されている.
#[derive(Debug)]
pub struct SubpagePool {
    elem_size: u32,
    links: Vec<Link>,
    free_slots: Vec<usize>,
    len: usize,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: usize,
    next: usize,
    key: SubpageKey,
}

const HEAD: usize = 0;
const UNLINKED: usize = usize::max_value();

impl SubpagePool {
    /// 指定された要素サイズ用の空のリストを生成する.
    pub fn new(elem_size: u32) -> Self {
        let sentinel = Link {
            prev: HEAD,
            next: HEAD,
            key: SubpageKey {
                chunk: ChunkId::nil(),
                node: 0,
            },
        };
        SubpagePool {
            elem_size,
            links: vec![sentinel],
            free_slots: Vec::new(),
            len: 0,
        }
    }

    /// このリストが扱う要素サイズを返す.
    pub fn elem_size(&self) -> u32 {
        self.elem_size
    }

    /// リスト内のサブページ数を返す.
    pub fn len(&self) -> usize {
        self.len
    }

    /// リストが空かどうかを返す.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 先頭(番兵の直後)から順にキーを辿るイテレータを返す.
    pub fn iter(&self) -> Iter {
        Iter {
            pool: self,
            slot: self.links[HEAD].next,
        }
    }

    pub(crate) fn insert_after_head(&mut self, key: SubpageKey) -> usize {
        let slot = if let Some(slot) = self.free_slots.pop() {
            slot
        } else {
            self.links.push(self.links[HEAD]);
            self.links.len() - 1
        };
        let head_next = self.links[HEAD].next;
        self.links[slot] = Link {
            prev: HEAD,
            next: head_next,
            key,
        };
        self.links[head_next].prev = slot;
        self.links[HEAD].next = slot;
        self.len += 1;
        slot
    }

    pub(crate) fn remove(&mut self, slot: usize) -> SubpageKey {
        debug_assert!(slot != HEAD && slot < self.links.len());
        let Link { prev, next, key } = self.links[slot];
        debug_assert!(prev != UNLINKED);
        self.links[prev].next = next;
        self.links[next].prev = prev;
        self.links[slot].prev = UNLINKED;
        self.links[slot].next = UNLINKED;
        self.free_slots.push(slot);
        self.len -= 1;
        key
    }
}

/// [`SubpagePool`]のキーを先頭から辿るイテレータ.
///
/// [`SubpagePool`]: ./struct.SubpagePool.html
#[derive(Debug)]
pub struct Iter<'a> {
    pool: &'a SubpagePool,
    slot: usize,
}
impl<'a> Iterator for Iter<'a> {
    type Item = SubpageKey;
    fn next(&mut self) -> Option<Self::Item> {
        if self.slot == HEAD {
            None
        } else {
            let link = self.pool.links[self.slot];
            self.slot = link.next;
            Some(link.key)
        }
    }
}

/// サイズクラスからサブページリストを引くためのディレクトリ.
///
/// 個々のリスト(とそのロック)はプール管理層に所有されるが、
/// 「正規化済みサイズ -> リスト」の対応付けはこの構造体が一手に担う.
/// リストはサイズクラス毎に遅延生成される.
#[derive(Debug)]
pub struct SubpagePools {
    pools: BTreeMap<u32, SubpagePool>,
}
impl SubpagePools {
    /// 空のディレクトリを生成する.
    pub fn new() -> Self {
        SubpagePools {
            pools: BTreeMap::new(),
        }
    }

    /// `elem_size`用のリストを返す(未登録の場合には空のリストを生成する).
    pub fn head_of(&mut self, elem_size: u32) -> &mut SubpagePool {
        self.pools
            .entry(elem_size)
            .or_insert_with(|| SubpagePool::new(elem_size))
    }

    /// `elem_size`用のリストが既に存在すればそれを返す.
    pub fn get(&self, elem_size: u32) -> Option<&SubpagePool> {
        self.pools.get(&elem_size)
    }
}
impl Default for SubpagePools {
    fn default() -> Self {
        Self::new()
    }
}
