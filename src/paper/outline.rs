//! 大纲排序代数（纯函数）
//!
//! 章节顺序以「数组 + 下标」表示：position 即下标，hierarchy_path 由层级序列推导。
//! Section Store 在持锁状态下读取完整列表、调用这里计算新顺序，再整体提交。

use crate::core::StoreError;
use crate::paper::model::{MoveAction, Section};

/// 由层级序列推导展示编号
///
/// 层级超过前一节 +1 时按 +1 处理；进入更浅层级时，更深层的计数器清零。
/// 全为 1 级时得到 "1", "2", "3"...
pub fn hierarchy_paths<I>(levels: I) -> Vec<String>
where
    I: IntoIterator<Item = u8>,
{
    let mut counters: Vec<u32> = Vec::new();
    let mut paths = Vec::new();

    for level in levels {
        let depth = (level.max(1) as usize).min(counters.len() + 1);
        counters.truncate(depth);
        if counters.len() < depth {
            counters.push(0);
        }
        counters[depth - 1] += 1;
        paths.push(
            counters
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join("."),
        );
    }

    paths
}

/// 按当前数组顺序重写 position 与 hierarchy_path
pub fn renumber(sections: &mut [Section]) {
    let paths = hierarchy_paths(sections.iter().map(|s| s.level));
    for (idx, (section, path)) in sections.iter_mut().zip(paths).enumerate() {
        section.position = idx;
        section.hierarchy_path = path;
    }
}

/// 计算移动目标下标；up/down 在边界处原地不动（非错误）
pub fn resolve_target(len: usize, current: usize, action: MoveAction) -> Result<usize, StoreError> {
    let last = len.saturating_sub(1);
    match action {
        MoveAction::Up => Ok(current.saturating_sub(1)),
        MoveAction::Down => Ok((current + 1).min(last)),
        MoveAction::Top => Ok(0),
        MoveAction::Bottom => Ok(last),
        MoveAction::ToPosition { new_position } => {
            if new_position >= len {
                Err(StoreError::OutOfRange {
                    position: new_position,
                    len,
                })
            } else {
                Ok(new_position)
            }
        }
    }
}

/// 将 from 处元素移到 to，中间元素整体平移一位
pub fn relocate<T>(items: &mut Vec<T>, from: usize, to: usize) {
    if from == to || from >= items.len() || to >= items.len() {
        return;
    }
    let item = items.remove(from);
    items.insert(to, item);
}

/// position 是否构成 0..N-1 的连续序列（按数组顺序）
pub fn is_contiguous(sections: &[Section]) -> bool {
    sections.iter().enumerate().all(|(i, s)| s.position == i)
}

/// 存储值与从头重算的 hierarchy_path 是否一致
pub fn paths_consistent(sections: &[Section]) -> bool {
    let expected = hierarchy_paths(sections.iter().map(|s| s.level));
    sections
        .iter()
        .zip(expected.iter())
        .all(|(s, p)| &s.hierarchy_path == p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_paths() {
        assert_eq!(hierarchy_paths([1, 1, 1]), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_nested_paths() {
        assert_eq!(
            hierarchy_paths([1, 2, 2, 1, 2, 3, 1]),
            vec!["1", "1.1", "1.2", "2", "2.1", "2.1.1", "3"]
        );
    }

    #[test]
    fn test_level_jump_is_clamped() {
        // 1 级后直接 3 级，按 2 级编号
        assert_eq!(hierarchy_paths([1, 3, 3]), vec!["1", "1.1", "1.1.1"]);
        // 首节不能是子级
        assert_eq!(hierarchy_paths([2, 2]), vec!["1", "1.1"]);
    }

    #[test]
    fn test_resolve_target_boundaries() {
        assert_eq!(resolve_target(3, 0, MoveAction::Up).unwrap(), 0);
        assert_eq!(resolve_target(3, 2, MoveAction::Down).unwrap(), 2);
        assert_eq!(resolve_target(3, 1, MoveAction::Top).unwrap(), 0);
        assert_eq!(resolve_target(3, 1, MoveAction::Bottom).unwrap(), 2);
        assert_eq!(
            resolve_target(3, 1, MoveAction::ToPosition { new_position: 2 }).unwrap(),
            2
        );
        assert_eq!(
            resolve_target(3, 1, MoveAction::ToPosition { new_position: 3 }),
            Err(StoreError::OutOfRange { position: 3, len: 3 })
        );
    }

    #[test]
    fn test_relocate_shifts_between() {
        let mut v = vec!["a", "b", "c", "d"];
        relocate(&mut v, 3, 1);
        assert_eq!(v, vec!["a", "d", "b", "c"]);
        relocate(&mut v, 0, 3);
        assert_eq!(v, vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn test_relocate_round_trip() {
        let original = vec![0, 1, 2, 3, 4];
        for from in 0..5 {
            for to in 0..5 {
                let mut v = original.clone();
                relocate(&mut v, from, to);
                relocate(&mut v, to, from);
                assert_eq!(v, original, "from {from} to {to}");
            }
        }
    }
}
