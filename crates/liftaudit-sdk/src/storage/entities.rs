//! 数据实体定义 - 离线项目聚合
//!
//! ProjectAggregate 是离线存储的最小单元：一个项目（建筑）连同其嵌套的
//! 电梯设备、楼层表、检查清单答案整体缓存、整体同步。
//!
//! 服务端自有的业务字段（名称、地址、检验日期、分类、账户引用等）对本
//! 子系统是不透明负载：通过 `#[serde(flatten)]` 原样捕获并回传，字段名
//! 保留，保证与服务端 schema 演进的前向兼容。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 不透明字段负载（保留字段名的自描述结构）
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

/// 检查清单条目的答案
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChecklistAnswer {
    /// 检查结果状态（如 "ok" / "defect" / "n.a."，语义由服务端定义）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// 检查备注
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ChecklistAnswer {
    /// 浅合并：仅覆盖传入答案中实际携带的字段，另一字段保持原值
    pub fn merge_from(&mut self, other: ChecklistAnswer) {
        if other.status.is_some() {
            self.status = other.status;
        }
        if other.comment.is_some() {
            self.comment = other.comment;
        }
    }
}

/// 楼层记录（设备的子记录，按 `_id` 识别，不按下标）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorRecord {
    #[serde(rename = "_id")]
    pub id: String,
    /// 楼层业务字段（designation、floor_levelling 等），不透明负载
    #[serde(flatten)]
    pub fields: FieldMap,
}

impl FloorRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: FieldMap::new(),
        }
    }

    /// 设置单个业务字段（浅合并语义：只替换该字段，其余字段不动）
    pub fn set_field(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }
}

/// 设备记录（一台电梯），内嵌楼层表与检查清单答案
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub floors: Vec<FloorRecord>,
    /// 检查清单条目 id -> 答案
    #[serde(default)]
    pub checklists: BTreeMap<String, ChecklistAnswer>,
    /// 设备业务字段（型号、出厂编号等），不透明负载
    #[serde(flatten)]
    pub fields: FieldMap,
}

impl EquipmentRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            floors: Vec::new(),
            checklists: BTreeMap::new(),
            fields: FieldMap::new(),
        }
    }

    pub fn floor(&self, floor_id: &str) -> Option<&FloorRecord> {
        self.floors.iter().find(|f| f.id == floor_id)
    }

    pub fn floor_mut(&mut self, floor_id: &str) -> Option<&mut FloorRecord> {
        self.floors.iter_mut().find(|f| f.id == floor_id)
    }

    /// 按 `_id` 合并楼层：已存在则替换该条，不存在则追加，其余条目保持原序
    pub fn upsert_floor(&mut self, floor: FloorRecord) {
        match self.floor_mut(&floor.id) {
            Some(existing) => *existing = floor,
            None => self.floors.push(floor),
        }
    }

    /// 合并清单答案（浅合并，见 [`ChecklistAnswer::merge_from`]）
    pub fn merge_checklist_answer(&mut self, item_id: impl Into<String>, answer: ChecklistAnswer) {
        self.checklists
            .entry(item_id.into())
            .or_default()
            .merge_from(answer);
    }
}

/// 项目聚合 - 离线存储单元
///
/// 脏标记不变量：`has_local_changes == true` 当且仅当
/// `last_local_change_at` 非空。唯一的修改入口是 [`mark_dirty`] /
/// [`mark_clean`]，调用方不直接写这两个字段。
///
/// [`mark_dirty`]: ProjectAggregate::mark_dirty
/// [`mark_clean`]: ProjectAggregate::mark_clean
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectAggregate {
    pub id: String,
    #[serde(default)]
    pub equipments: Vec<EquipmentRecord>,
    /// 本地副本是否严格新于服务端（同步前禁止被服务端副本覆盖）
    #[serde(default)]
    pub has_local_changes: bool,
    /// 最近一次本地变更时间（UTC 毫秒）；不脏时为 None
    #[serde(default)]
    pub last_local_change_at: Option<i64>,
    /// 最近一次成功推送/拉取时间（UTC 毫秒）
    #[serde(default)]
    pub last_synced_at: Option<i64>,
    /// 首次缓存到本地的时间（UTC 毫秒），仅用于 LRU 淘汰排序。
    /// 服务端 JSON 不携带该字段，入库前由权威判定器填写。
    #[serde(default)]
    pub offline_timestamp: i64,
    /// 项目业务字段（名称、地址、检验日期等），不透明负载
    #[serde(flatten)]
    pub core_fields: FieldMap,
}

impl ProjectAggregate {
    /// 创建一个空聚合（本地新建路径，如"新增设备"时项目尚未缓存）
    pub fn new(id: impl Into<String>, cached_at: i64) -> Self {
        Self {
            id: id.into(),
            equipments: Vec::new(),
            has_local_changes: false,
            last_local_change_at: None,
            last_synced_at: None,
            offline_timestamp: cached_at,
            core_fields: FieldMap::new(),
        }
    }

    /// 标记为脏（本地内容变更后调用）
    pub fn mark_dirty(&mut self, changed_at: i64) {
        self.has_local_changes = true;
        self.last_local_change_at = Some(changed_at);
    }

    /// 标记为干净（服务端来源的写入、或同步成功后调用）
    pub fn mark_clean(&mut self) {
        self.has_local_changes = false;
        self.last_local_change_at = None;
    }

    /// 脏标记不变量校验（供存储层写入前断言与测试使用）
    pub fn invariant_holds(&self) -> bool {
        self.has_local_changes == self.last_local_change_at.is_some()
    }

    pub fn equipment(&self, equipment_id: &str) -> Option<&EquipmentRecord> {
        self.equipments.iter().find(|e| e.id == equipment_id)
    }

    pub fn equipment_mut(&mut self, equipment_id: &str) -> Option<&mut EquipmentRecord> {
        self.equipments.iter_mut().find(|e| e.id == equipment_id)
    }

    /// 按 `_id` 合并设备：已存在则替换该条，不存在则追加，其余条目保持原序
    pub fn upsert_equipment(&mut self, equipment: EquipmentRecord) {
        match self.equipment_mut(&equipment.id) {
            Some(existing) => *existing = equipment,
            None => self.equipments.push(equipment),
        }
    }

    /// 定位到指定设备的指定楼层并设置单个字段，返回是否命中
    pub fn set_floor_field(
        &mut self,
        equipment_id: &str,
        floor_id: &str,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> bool {
        match self
            .equipment_mut(equipment_id)
            .and_then(|e| e.floor_mut(floor_id))
        {
            Some(floor) => {
                floor.set_field(key, value);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_project() -> ProjectAggregate {
        let mut floor = FloorRecord::new("f1");
        floor.set_field("designation", json!(""));
        let mut equipment = EquipmentRecord::new("e1");
        equipment.floors.push(floor);
        let mut project = ProjectAggregate::new("p1", 1_000);
        project.equipments.push(equipment);
        project
    }

    #[test]
    fn test_dirty_invariant() {
        let mut project = sample_project();
        assert!(project.invariant_holds());

        project.mark_dirty(2_000);
        assert!(project.has_local_changes);
        assert_eq!(project.last_local_change_at, Some(2_000));
        assert!(project.invariant_holds());

        project.mark_clean();
        assert!(!project.has_local_changes);
        assert!(project.last_local_change_at.is_none());
        assert!(project.invariant_holds());
    }

    #[test]
    fn test_floor_field_merge_preserves_other_fields() {
        let mut project = sample_project();

        assert!(project.set_floor_field("e1", "f1", "designation", json!("L1")));
        assert!(project.set_floor_field("e1", "f1", "floor_levelling", json!("+2mm")));

        let floor = project.equipment("e1").unwrap().floor("f1").unwrap();
        assert_eq!(floor.field("designation"), Some(&json!("L1")));
        assert_eq!(floor.field("floor_levelling"), Some(&json!("+2mm")));

        // 未命中的路径不产生副作用
        assert!(!project.set_floor_field("e1", "missing", "designation", json!("x")));
        assert!(!project.set_floor_field("missing", "f1", "designation", json!("x")));
    }

    #[test]
    fn test_upsert_by_id_not_by_index() {
        let mut project = sample_project();
        let mut second = EquipmentRecord::new("e2");
        second.fields.insert("serial".into(), json!("A-100"));
        project.equipments.push(second);

        // 替换 e1 不影响 e2，也不改变顺序
        let mut replacement = EquipmentRecord::new("e1");
        replacement.fields.insert("serial".into(), json!("B-200"));
        project.upsert_equipment(replacement);

        assert_eq!(project.equipments.len(), 2);
        assert_eq!(project.equipments[0].id, "e1");
        assert_eq!(project.equipments[0].fields["serial"], json!("B-200"));
        assert_eq!(project.equipments[1].fields["serial"], json!("A-100"));

        // 未知 id 追加
        project.upsert_equipment(EquipmentRecord::new("e3"));
        assert_eq!(project.equipments.len(), 3);
    }

    #[test]
    fn test_checklist_answer_shallow_merge() {
        let mut equipment = EquipmentRecord::new("e1");
        equipment.merge_checklist_answer(
            "chk-7",
            ChecklistAnswer {
                status: Some("defect".into()),
                comment: None,
            },
        );
        equipment.merge_checklist_answer(
            "chk-7",
            ChecklistAnswer {
                status: None,
                comment: Some("door sensor".into()),
            },
        );

        let answer = &equipment.checklists["chk-7"];
        assert_eq!(answer.status.as_deref(), Some("defect"));
        assert_eq!(answer.comment.as_deref(), Some("door sensor"));
    }

    #[test]
    fn test_opaque_fields_round_trip() {
        let raw = json!({
            "id": "p1",
            "name": "Tour Horizon",
            "address": "12 rue des Lilas",
            "inspection_date": "2025-11-03",
            "offline_timestamp": 5000,
            "has_local_changes": false,
            "equipments": [{
                "_id": "e1",
                "manufacturer": "Koné",
                "floors": [{"_id": "f1", "designation": "RDC"}],
                "checklists": {"chk-1": {"status": "ok"}}
            }]
        });

        let project: ProjectAggregate = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(project.core_fields["name"], json!("Tour Horizon"));
        assert_eq!(
            project.equipments[0].fields["manufacturer"],
            json!("Koné")
        );

        // 字段名保留，未知字段原样回传
        let back = serde_json::to_value(&project).unwrap();
        assert_eq!(back["name"], raw["name"]);
        assert_eq!(back["address"], raw["address"]);
        assert_eq!(back["equipments"][0]["manufacturer"], json!("Koné"));
        assert_eq!(back["equipments"][0]["floors"][0]["designation"], json!("RDC"));
    }
}
