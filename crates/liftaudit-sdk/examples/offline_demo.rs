//! 离线编辑 → 同步回放演示
//!
//! 用内存传输模拟服务端，走一遍完整的离线周期：
//! 在线播种 → 离线修改 → 离线重开（脏副本权威）→ 恢复在线 → 整批推送

use async_trait::async_trait;
use liftaudit_sdk::{
    EquipmentRecord, FetchError, FloorRecord, LiftauditConfig, LiftauditSDK, ProjectAggregate,
    ProjectTransport, PushError,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// 演示用传输：HashMap 充当服务端
#[derive(Debug, Default)]
struct DemoTransport {
    server: Mutex<HashMap<String, ProjectAggregate>>,
}

#[async_trait]
impl ProjectTransport for DemoTransport {
    async fn fetch_project(&self, project_id: &str) -> Result<ProjectAggregate, FetchError> {
        self.server
            .lock()
            .await
            .get(project_id)
            .cloned()
            .ok_or(FetchError::NotFound)
    }

    async fn push_equipments(
        &self,
        project_id: &str,
        equipments: &[EquipmentRecord],
    ) -> Result<(), PushError> {
        let mut server = self.server.lock().await;
        let project = server
            .get_mut(project_id)
            .ok_or_else(|| PushError::Rejected("unknown project".to_string()))?;
        project.equipments = equipments.to_vec();
        println!("   [服务端] 收到 {} 台设备的批量更新", equipments.len());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("========================================");
    println!("离线优先同步演示");
    println!("========================================\n");

    // === 1. 准备服务端数据 ===

    let transport = Arc::new(DemoTransport::default());
    {
        let mut floor = FloorRecord::new("f1");
        floor.set_field("designation", json!(""));
        let mut equipment = EquipmentRecord::new("e1");
        equipment.floors.push(floor);
        let mut project = ProjectAggregate::new("p1", 0);
        project.core_fields.insert("name".into(), json!("Tour Horizon"));
        project.equipments.push(equipment);
        transport.server.lock().await.insert("p1".into(), project);
    }

    // === 2. 初始化 SDK ===

    let data_dir = std::env::temp_dir().join("liftaudit_offline_demo");
    let config = LiftauditConfig::builder()
        .data_dir(&data_dir)
        .max_cached_projects(10)
        .build()?;
    let sdk = LiftauditSDK::initialize(config, transport.clone()).await?;
    println!("✅ SDK 初始化完成（后端: {}）\n", sdk.stats().await?.backend);

    // === 3. 在线打开项目：从服务端播种 ===

    let resolved = sdk.open_project("p1").await?;
    println!("📥 打开项目 p1，权威来源: {:?}", resolved.source);

    // === 4. 切入离线模式并修改 ===

    sdk.set_offline_mode(true).await?;
    println!("\n📴 已切入手动离线模式");

    sdk.apply_local_mutation("p1", |project| {
        project.set_floor_field("e1", "f1", "designation", json!("L1"));
    })
    .await?;
    println!("✏️  已离线修改楼层标识: designation = \"L1\"");

    let status = sdk.project_status("p1").await?.unwrap();
    println!(
        "   脏标记: {}，未同步项目数: {}",
        status.has_local_changes,
        sdk.dirty_project_ids().await?.len()
    );

    // 离线重开：脏副本是权威，内容原样
    let reopened = sdk.open_project("p1").await?;
    println!("🔁 离线重开项目，权威来源: {:?}", reopened.source);

    // === 5. 恢复在线并同步 ===

    sdk.set_offline_mode(false).await?;
    println!("\n📶 已恢复在线，开始同步...");

    let outcome = sdk.sync_project("p1").await?;
    println!("✅ 同步结果: {:?}", outcome);
    println!(
        "   本地影子副本已删除: {}",
        sdk.project_status("p1").await?.is_none()
    );

    // 下次打开重新从服务端拉取（带着刚推上去的修改）
    let fresh = sdk.open_project("p1").await?;
    let designation = fresh
        .aggregate
        .equipment("e1")
        .and_then(|e| e.floor("f1"))
        .and_then(|f| f.field("designation"))
        .cloned();
    println!("📥 重新拉取，楼层标识 = {:?}", designation);

    sdk.shutdown().await?;
    println!("\n演示结束");
    Ok(())
}
