use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Users are owned by the identity provider; the engine only reads them.
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Users::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Users::Email).string().not_null().unique_key())
                    .col(ColumnDef::new(Users::DisplayName).string().not_null())
                    .col(
                        ColumnDef::new(Users::IsAdmin)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Users::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CouponTemplates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CouponTemplates::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CouponTemplates::Code)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(CouponTemplates::Name).string().not_null())
                    .col(ColumnDef::new(CouponTemplates::OrganizerId).uuid().null())
                    .col(
                        ColumnDef::new(CouponTemplates::DiscountType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CouponTemplates::DiscountValue)
                            .decimal_len(12, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CouponTemplates::UsageType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(CouponTemplates::MaxIssuance).integer().null())
                    .col(
                        ColumnDef::new(CouponTemplates::ValidFrom)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CouponTemplates::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CouponTemplates::RedemptionMethods)
                            .string_len(32)
                            .not_null()
                            .default("qr"),
                    )
                    .col(
                        ColumnDef::new(CouponTemplates::MerchantPin)
                            .string_len(16)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CouponTemplates::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(CouponTemplates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CouponTemplates::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(IssuedCoupons::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IssuedCoupons::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IssuedCoupons::UniqueCode)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(IssuedCoupons::TemplateId).uuid().not_null())
                    .col(ColumnDef::new(IssuedCoupons::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(IssuedCoupons::Status)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IssuedCoupons::TimesCanBeUsed)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IssuedCoupons::TimesUsed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(IssuedCoupons::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(IssuedCoupons::IssuedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(IssuedCoupons::AssignedBy).uuid().null())
                    .col(
                        ColumnDef::new(IssuedCoupons::AssignmentMethod)
                            .string_len(16)
                            .not_null()
                            .default("auto"),
                    )
                    .col(
                        ColumnDef::new(IssuedCoupons::AssignmentReason)
                            .string_len(500)
                            .null(),
                    )
                    .col(ColumnDef::new(IssuedCoupons::AssignmentNotes).text().null())
                    .col(
                        ColumnDef::new(IssuedCoupons::Quantity)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(IssuedCoupons::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_issued_coupons_template")
                            .from(IssuedCoupons::Table, IssuedCoupons::TemplateId)
                            .to(CouponTemplates::Table, CouponTemplates::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_issued_coupons_user")
                            .from(IssuedCoupons::Table, IssuedCoupons::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_issued_coupons_assigned_by")
                            .from(IssuedCoupons::Table, IssuedCoupons::AssignedBy)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Collisions on the generated code surface here and are retried by the generator
        manager
            .create_index(
                Index::create()
                    .name(crate::ISSUED_COUPON_CODE_INDEX)
                    .table(IssuedCoupons::Table)
                    .col(IssuedCoupons::UniqueCode)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Manual duplicate-assignment rule; automatic rows carry a NULL assigned_by
        manager
            .create_index(
                Index::create()
                    .name("idx_issued_coupons_assignment")
                    .table(IssuedCoupons::Table)
                    .col(IssuedCoupons::TemplateId)
                    .col(IssuedCoupons::UserId)
                    .col(IssuedCoupons::AssignedBy)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_issued_coupons_template_user")
                    .table(IssuedCoupons::Table)
                    .col(IssuedCoupons::TemplateId)
                    .col(IssuedCoupons::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CouponUsageLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CouponUsageLogs::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CouponUsageLogs::IssuedCouponId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CouponUsageLogs::RedeemedByUserId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CouponUsageLogs::UsedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CouponUsageLogs::Location).string().null())
                    .col(ColumnDef::new(CouponUsageLogs::Details).json().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_coupon_usage_logs_issued_coupon")
                            .from(CouponUsageLogs::Table, CouponUsageLogs::IssuedCouponId)
                            .to(IssuedCoupons::Table, IssuedCoupons::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_coupon_usage_logs_issued_coupon_id")
                    .table(CouponUsageLogs::Table)
                    .col(CouponUsageLogs::IssuedCouponId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CouponUsageLogs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(IssuedCoupons::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CouponTemplates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Email,
    DisplayName,
    IsAdmin,
    IsActive,
    CreatedAt,
}

#[derive(DeriveIden)]
enum CouponTemplates {
    Table,
    Id,
    Code,
    Name,
    OrganizerId,
    DiscountType,
    DiscountValue,
    UsageType,
    MaxIssuance,
    ValidFrom,
    ExpiresAt,
    RedemptionMethods,
    MerchantPin,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum IssuedCoupons {
    Table,
    Id,
    UniqueCode,
    TemplateId,
    UserId,
    Status,
    TimesCanBeUsed,
    TimesUsed,
    ExpiresAt,
    IssuedAt,
    AssignedBy,
    AssignmentMethod,
    AssignmentReason,
    AssignmentNotes,
    Quantity,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CouponUsageLogs {
    Table,
    Id,
    IssuedCouponId,
    RedeemedByUserId,
    UsedAt,
    Location,
    Details,
}
