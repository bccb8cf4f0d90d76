//! Parsing of `/proc/<pid>/mountinfo` tables.

/// One line of a process mount table.
///
/// The format is described in
/// [the kernel documentation](https://www.kernel.org/doc/Documentation/filesystems/proc.txt).
/// Each line carries the following fields:
///
/// ```ignore
/// 36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue
/// (1)(2)(3)   (4)   (5)      (6)      (7)   (8) (9)   (10)         (11)
/// ```
///
/// Only the fixed leading fields are kept here. Field 4, the root of the
/// mount inside its filesystem, is where kubelet-managed cgroup paths show
/// up and is the one field scans actually inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    pub mount_id: String,
    pub parent_id: String,
    pub root: String,
    pub mount_point: String,
}

/// Parses every well-formed record out of a mount table, skipping lines
/// too short to carry the fixed fields.
pub fn parse_mount_records(table: &str) -> Vec<MountRecord> {
    table.lines().filter_map(parse_record).collect()
}

fn parse_record(line: &str) -> Option<MountRecord> {
    let mut fields = line.split_whitespace();
    let mount_id = fields.next()?;
    let parent_id = fields.next()?;
    let _device = fields.next()?;
    let root = fields.next()?;
    let mount_point = fields.next()?;
    Some(MountRecord {
        mount_id: mount_id.to_string(),
        parent_id: parent_id.to_string(),
        root: root.to_string(),
        mount_point: mount_point.to_string(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_a_cgroup_mount_record() {
        let table = "1487 1486 0:32 /kubelet.slice/kubelet-kubepods.slice/kubelet-kubepods-besteffort.slice/kubelet-kubepods-besteffort-pod18640755_cc12_4557_b96e_0f74d5b44d1d.slice/cri-containerd-66221e7d988e193822a3e8368b61ad9aeabf6b5276df76daebb7ea33bccc0b87.scope /sys/fs/cgroup ro,nosuid,nodev,noexec,relatime - cgroup2 cgroup rw,nsdelegate,memory_recursiveprot\n";

        let records = parse_mount_records(table);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mount_id, "1487");
        assert_eq!(records[0].parent_id, "1486");
        assert!(records[0].root.starts_with("/kubelet.slice/"));
        assert_eq!(records[0].mount_point, "/sys/fs/cgroup");
    }

    #[test]
    fn parses_a_realistic_table() {
        let table = "24 31 0:22 / /proc rw,nosuid,nodev,noexec,relatime - proc proc rw
25 31 0:23 / /sys rw,nosuid,nodev,noexec,relatime - sysfs sysfs rw
31 1 0:27 / / rw,relatime - btrfs /dev/sda1 rw,ssd,space_cache=v2
34 25 0:30 /kubepods/burstable/podcafe-1234/abc /sys/fs/cgroup rw,nosuid - tmpfs cgroup_root rw,mode=755";

        let records = parse_mount_records(table);
        assert_eq!(records.len(), 4);
        assert_eq!(records[1].mount_point, "/sys");
        assert_eq!(records[3].root, "/kubepods/burstable/podcafe-1234/abc");
    }

    #[test]
    fn short_lines_are_skipped() {
        let records = parse_mount_records("oops\n24 31 0:22\n\n");
        assert!(records.is_empty());
    }
}
